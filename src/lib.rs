//! # mcast-torrent
//!
//! 토렌트 피스를 IP 멀티캐스트로 배포하는 전송 계층
//!
//! ## 핵심 특징
//! - **멀티캐스트 송신**: 시드가 피스를 블록 단위로 그룹에 고정 간격 전송
//! - **순서 무관 조립**: 수신측은 피스별 구간 추적으로 블록을 조립 후 엔진에 커밋
//! - **피스 선택 전략**: 무작위 / 순차 순환 (교체 가능)
//! - **IPv4 / IPv6**: 패밀리별 소켓 옵션 차이를 감춤
//! - **계층형 알림**: 상위 종류에 등록하면 하위 종류 알림까지 수신
//!
//! 토렌트 메타데이터, 피스 검증, 저장은 외부 엔진(`TorrentEngine`)이 담당한다.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod multicast;
pub mod packet;
pub mod piece;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;

pub use alerts::{Alert, AlertBus, Alerts, InvalidMessage, Kind, ListenerId};
pub use config::Config;
pub use engine::{CommitFlags, MemoryTorrent, TorrentEngine};
pub use error::{Error, Result};
pub use multicast::{Family, IpOption, MulticastSocket};
pub use packet::{DecodeError, Packet};
pub use progress::{Progress, RangeError};
pub use receiver::ReceiveLoop;
pub use sender::{first_to_last_order, random_order, PieceOrder, SendLoop};
pub use session::{LoopHandle, Session};
pub use stats::TransferStats;

/// 기본 블록 크기 (바이트)
pub const DEFAULT_BLOCK_SIZE: usize = 16384;

/// 기본 읽기 파이프라인 깊이
pub const DEFAULT_PIPELINE_DEPTH: usize = 3;
