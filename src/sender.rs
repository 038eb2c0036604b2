//! 송신 루프 (시드측)
//!
//! - 피스 선택 전략으로 다음 피스 결정
//! - 엔진에 최대 `pipeline_depth`개의 읽기 요청 유지
//! - 읽힌 피스를 블록으로 나눠 고정 간격으로 멀티캐스트 전송

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, Alerts, Kind};
use crate::engine::TorrentEngine;
use crate::multicast::{Family, MulticastSocket};
use crate::piece::BlockBuilder;
use crate::stats::TransferStats;
use crate::{Config, Result};

/// 피스 선택 전략: (보낼 수 있는 피스 집합, 직전 선택) → 다음 피스
///
/// 집합이 비어 있으면 `None`.
pub type PieceOrder = fn(&BTreeSet<u32>, Option<u32>) -> Option<u32>;

/// 무작위 선택
pub fn random_order(pieces: &BTreeSet<u32>, _previous: Option<u32>) -> Option<u32> {
    pieces.iter().copied().choose(&mut rand::thread_rng())
}

/// 직전 피스 다음 인덱스부터 순서대로 (끝에 닿으면 처음으로)
///
/// 직전 선택이 없거나 범위를 벗어나면 처음부터.
pub fn first_to_last_order(pieces: &BTreeSet<u32>, previous: Option<u32>) -> Option<u32> {
    previous
        .and_then(|p| p.checked_add(1))
        .and_then(|start| pieces.range(start..).next())
        .or_else(|| pieces.iter().next())
        .copied()
}

/// 피스 읽기 완료 (엔진 알림에서 전달)
type ReadCompletion = (u32, Option<Bytes>);

/// 송신 루프
pub struct SendLoop {
    engine: Arc<dyn TorrentEngine>,
    socket: MulticastSocket,
    dest: SocketAddr,
    config: Config,
    order: PieceOrder,
    builder: BlockBuilder,
    alerts: Arc<Alerts>,
    stats: Arc<RwLock<TransferStats>>,
}

impl SendLoop {
    /// 송신 전용 소켓을 만든다. 설정 오류는 여기서 반환된다.
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        dest: SocketAddr,
        config: Config,
        order: PieceOrder,
        alerts: Arc<Alerts>,
    ) -> Result<Self> {
        let socket = MulticastSocket::new(
            Family::of(&dest.ip()).domain(),
            config.ttl,
            config.multicast_loop,
        )?;

        Ok(Self {
            engine,
            socket,
            dest,
            builder: BlockBuilder::new(config.block_size),
            config,
            order,
            alerts,
            stats: Arc::new(RwLock::new(TransferStats::new())),
        })
    }

    /// 통계 공유 핸들
    pub fn stats(&self) -> Arc<RwLock<TransferStats>> {
        self.stats.clone()
    }

    /// 정지 신호까지 실행
    pub async fn run(self, cancel: CancellationToken) {
        let (completed_tx, mut completed_rx) = mpsc::unbounded_channel::<ReadCompletion>();
        let listener = self.alerts.on(Kind::ReadPiece, move |alert: &Alert| {
            if let Alert::ReadPiece { piece, buffer } = alert {
                let _ = completed_tx.send((*piece, buffer.clone()));
            }
        });

        info!("멀티캐스트 송신 시작: {}", self.dest);
        self.alerts
            .emit(&Alert::Multicast(format!("sending to {}", self.dest)));

        let mut outstanding: BTreeSet<u32> = BTreeSet::new();
        let mut previous: Option<u32> = None;

        while !cancel.is_cancelled() {
            // 보낼 수 있는 피스 집합
            let available = self.engine.available_pieces();
            if available.is_empty() {
                debug!("보낼 피스 없음, {:?} 후 재시도", self.config.empty_backoff);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.empty_backoff) => continue,
                }
            }

            self.fill_pipeline(&available, &mut outstanding, &mut previous);

            // 읽기 완료 대기 (첫 피스 이후에는 거의 즉시)
            let (piece, buffer) =
                match tokio::time::timeout(self.config.read_timeout, completed_rx.recv()).await {
                    Ok(Some(completion)) => completion,
                    Ok(None) | Err(_) => {
                        // 타임아웃: 요청이 유실되었을 수 있으므로 처음부터 다시
                        debug!("피스 읽기 타임아웃, 파이프라인 초기화 ({}개)", outstanding.len());
                        outstanding.clear();
                        previous = None;
                        self.stats.write().pipeline_resets += 1;
                        continue;
                    }
                };

            // 다른 송신 루프의 요청이거나 초기화 전에 보낸 요청
            if !outstanding.remove(&piece) {
                continue;
            }

            let Some(data) = buffer.filter(|b| !b.is_empty()) else {
                warn!("피스 {} 읽기 실패", piece);
                self.stats.write().read_failures += 1;
                self.alerts.emit(&Alert::ReadFailed { piece });
                continue;
            };

            self.send_piece(piece, data, &cancel).await;
        }

        self.alerts.off(listener);
        info!("멀티캐스트 송신 종료: {}", self.stats.read().summary());
    }

    /// 읽기 요청을 `min(pipeline_depth, 보낼 수 있는 피스 수)`개까지 채움
    fn fill_pipeline(
        &self,
        available: &BTreeSet<u32>,
        outstanding: &mut BTreeSet<u32>,
        previous: &mut Option<u32>,
    ) {
        let limit = self.config.pipeline_depth.min(available.len());
        while outstanding.len() < limit {
            let candidates: BTreeSet<u32> = available.difference(outstanding).copied().collect();
            let Some(piece) = (self.order)(&candidates, *previous) else {
                break;
            };
            *previous = Some(piece);
            outstanding.insert(piece);
            self.engine.request_read(piece);
        }
    }

    /// 피스를 블록 단위로 전송. 블록마다 `1 / blocks_per_second` 대기
    async fn send_piece(&self, piece: u32, data: Bytes, cancel: &CancellationToken) {
        let blocks = match self.builder.split_into_blocks(piece, &data) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("피스 {} 분할 실패: {}", piece, e);
                return;
            }
        };
        let interval = self.config.block_interval();

        for block in &blocks {
            if cancel.is_cancelled() {
                return;
            }

            let offset = block.block_offset as usize;
            let length = block.payload.len();
            match self.socket.send_to(&block.encode(), self.dest).await {
                Ok(_) => {
                    self.stats.write().record_block(length);
                    self.alerts.emit(&Alert::BlockSent {
                        piece,
                        offset,
                        length,
                        to: self.dest,
                    });
                }
                Err(e) => warn!("블록 전송 실패 (piece={}, offset={}): {}", piece, offset, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.stats.write().completed_pieces += 1;
        debug!("피스 {} 전송 완료: {} 블록", piece, blocks.len());
    }
}
