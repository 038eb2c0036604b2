//! 전송 설정

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::multicast::{DEFAULT_GROUP_V4, DEFAULT_GROUP_V6, DEFAULT_PORT, DEFAULT_TTL};
use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_PIPELINE_DEPTH};

/// 멀티캐스트 전송 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 멀티캐스트 그룹 주소
    pub group: IpAddr,

    /// 멀티캐스트 포트
    pub port: u16,

    /// 멀티캐스트 TTL / hop limit
    pub ttl: u32,

    /// 같은 호스트로 loop-back 여부
    pub multicast_loop: bool,

    /// 블록 크기 (바이트)
    pub block_size: usize,

    /// 초당 전송 블록 수 (블록 사이 간격 = 1 / blocks_per_second)
    pub blocks_per_second: f64,

    /// 동시에 요청 중인 피스 읽기 최대 수
    pub pipeline_depth: usize,

    /// 보낼 피스가 없을 때 대기 시간
    pub empty_backoff: Duration,

    /// 피스 읽기 완료 대기 타임아웃 (초과 시 파이프라인 초기화)
    pub read_timeout: Duration,

    /// 데이터그램 수신 타임아웃 (정지 신호 확인 주기)
    pub recv_timeout: Duration,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group: IpAddr::V4(DEFAULT_GROUP_V4),
            port: DEFAULT_PORT,
            ttl: DEFAULT_TTL,
            multicast_loop: true,
            block_size: DEFAULT_BLOCK_SIZE,
            blocks_per_second: 2.0,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            empty_backoff: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(2),
            recv_buffer_size: 65535,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// IPv6 기본 그룹 (ff01::114) 사용
    pub fn ipv6() -> Self {
        Self {
            group: IpAddr::V6(DEFAULT_GROUP_V6),
            ..Self::default()
        }
    }

    /// 로컬 테스트용 설정 (빠른 전송, 짧은 타임아웃)
    pub fn local_test() -> Self {
        Self {
            blocks_per_second: 1000.0,
            empty_backoff: Duration::from_millis(100),
            read_timeout: Duration::from_millis(500),
            recv_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// 그룹 주소와 포트 변경
    pub fn with_group(mut self, group: IpAddr, port: u16) -> Self {
        self.group = group;
        self.port = port;
        self
    }

    /// 그룹 소켓 주소
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// 블록 사이 전송 간격
    ///
    /// 0 이하이거나 유한하지 않은 속도는 간격 없음, 표현할 수 없을 만큼 긴 간격은 `Duration::MAX`.
    pub fn block_interval(&self) -> Duration {
        if self.blocks_per_second <= 0.0 || !self.blocks_per_second.is_finite() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(1.0 / self.blocks_per_second).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.group_addr(), "224.0.0.254:50000".parse().unwrap());
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.pipeline_depth, 3);
        assert_eq!(config.block_interval(), Duration::from_millis(500));
        assert_eq!(Config::ipv6().group_addr(), "[ff01::114]:50000".parse().unwrap());
    }

    #[test]
    fn test_block_interval_unpaced() {
        let config = Config {
            blocks_per_second: 0.0,
            ..Config::default()
        };
        assert_eq!(config.block_interval(), Duration::ZERO);
    }

    #[test]
    fn test_block_interval_tiny_rate_saturates() {
        for rate in [1e-300, f64::MIN_POSITIVE, 1e-20] {
            let config = Config {
                blocks_per_second: rate,
                ..Config::default()
            };
            assert_eq!(config.block_interval(), Duration::MAX);
        }

        let config = Config {
            blocks_per_second: 0.25,
            ..Config::default()
        };
        assert_eq!(config.block_interval(), Duration::from_secs(4));
    }
}
