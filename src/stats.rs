//! 전송 통계

use std::time::{Duration, Instant};

/// 송수신 루프 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신/수신한 블록 수
    pub total_blocks: u64,

    /// 송신/수신한 페이로드 바이트
    pub total_bytes: u64,

    /// 전송 완료 (송신) / 커밋 (수신) 한 피스 수
    pub completed_pieces: u64,

    /// 이미 가진 데이터의 블록 수
    pub duplicate_blocks: u64,

    /// 잘못된 메시지 수
    pub invalid_messages: u64,

    /// 엔진 읽기 실패 수
    pub read_failures: u64,

    /// 읽기 타임아웃으로 파이프라인을 비운 횟수
    pub pipeline_resets: u64,

    /// 마지막 블록 시간
    pub last_block_time: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_blocks: 0,
            total_bytes: 0,
            completed_pieces: 0,
            duplicate_blocks: 0,
            invalid_messages: 0,
            read_failures: 0,
            pipeline_resets: 0,
            last_block_time: None,
        }
    }

    /// 블록 기록
    pub fn record_block(&mut self, size: usize) {
        self.total_blocks += 1;
        self.total_bytes += size as u64;
        self.last_block_time = Some(Instant::now());
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 중복 블록 비율
    pub fn duplicate_ratio(&self) -> f64 {
        let total = self.total_blocks + self.duplicate_blocks;
        if total == 0 {
            return 0.0;
        }
        self.duplicate_blocks as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Pieces: {} | Blocks: {} | Bytes: {} | Throughput: {:.2} KB/s | Dup: {:.1}% | Invalid: {} | Read failures: {} | Resets: {}",
            self.elapsed().as_secs_f64(),
            self.completed_pieces,
            self.total_blocks,
            self.total_bytes,
            self.overall_throughput() / 1_000.0,
            self.duplicate_ratio() * 100.0,
            self.invalid_messages,
            self.read_failures,
            self.pipeline_resets,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
