//! 에러 타입 정의

use thiserror::Error;

use crate::packet::DecodeError;
use crate::progress::RangeError;

/// 멀티캐스트 전송 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// IPv4 / IPv6 가 아닌 소켓 패밀리
    #[error("알 수 없는 소켓 패밀리: {0:?}")]
    InvalidFamily(socket2::Domain),

    /// 소켓 하나당 그룹 하나만 가입 가능
    #[error("이미 멀티캐스트 그룹에 가입된 소켓: {group}")]
    AlreadyJoined { group: std::net::IpAddr },

    #[error("유효하지 않은 멀티캐스트 주소: {0}")]
    InvalidAddress(String),

    /// 피스 인덱스나 오프셋이 와이어 필드(i32) 범위를 넘음
    #[error("와이어 필드 범위 초과: piece={piece}, offset={offset}")]
    FieldOverflow { piece: u32, offset: usize },

    #[error("패킷 디코딩 실패: {0}")]
    Decode(#[from] DecodeError),

    #[error("범위 에러: {0}")]
    Range(#[from] RangeError),

    #[error("루프 태스크 종료 실패: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
