//! 계층형 알림 버스
//!
//! 알림 종류(kind)는 부모를 하나씩 갖는 트리를 이룬다. 어떤 종류에 등록된 리스너는
//! 그 종류와 모든 하위 종류의 알림을 받지만, 형제나 상위 종류의 알림은 받지 않는다.
//!
//! ```text
//! torrent
//! ├─ read_piece
//! ├─ piece_finished
//! └─ hash_failed
//! multicast
//! ├─ multicast_invalid
//! ├─ multicast_duplicate
//! ├─ multicast_block
//! │  ├─ multicast_block_sent
//! │  └─ multicast_block_received
//! └─ multicast_read_failed
//! ```

use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

use crate::packet::DecodeError;
use crate::progress::RangeError;

/// 알림 종류 트리의 노드
pub trait AlertKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// 부모 종류. 최상위 종류면 `None`
    fn parent(self) -> Option<Self>;
}

/// 종류를 가진 알림 값
pub trait Classified: Send + Sync + 'static {
    type Kind: AlertKind;

    fn kind(&self) -> Self::Kind;
}

/// 리스너 등록 ID (`AlertBus::off` 용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// 알림 버스
///
/// `emit`은 여러 태스크에서 동시에 호출될 수 있다. 리스너는 레지스트리 잠금 밖에서
/// 호출되므로 리스너 안에서 `on`/`off`를 불러도 된다.
pub struct AlertBus<A: Classified> {
    listeners: DashMap<A::Kind, Vec<(ListenerId, Listener<A>)>>,
    next_id: AtomicU64,
}

impl<A: Classified> AlertBus<A> {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// `kind` 및 하위 종류 알림에 대한 리스너 등록
    pub fn on<F>(&self, kind: A::Kind, callback: F) -> ListenerId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// 리스너 해제. 등록되어 있었으면 `true`
    pub fn off(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(listener_id, _)| *listener_id != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// 알림 발행
    ///
    /// 구체 종류부터 최상위 종류까지 올라가며, 각 종류에 등록된 리스너를 등록 순서대로 호출한다.
    pub fn emit(&self, alert: &A) {
        let mut kind = Some(alert.kind());
        while let Some(current) = kind {
            // 잠금을 쥔 채로 리스너를 호출하지 않도록 복사
            let listeners: Vec<Listener<A>> = self
                .listeners
                .get(&current)
                .map(|entry| entry.iter().map(|(_, f)| f.clone()).collect())
                .unwrap_or_default();

            for listener in listeners {
                listener(alert);
            }
            kind = current.parent();
        }
    }

    /// 등록된 리스너 총 수
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.len()).sum()
    }
}

impl<A: Classified> Default for AlertBus<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// 세션 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Torrent,
    ReadPiece,
    PieceFinished,
    HashFailed,
    Multicast,
    MulticastInvalid,
    MulticastDuplicate,
    MulticastBlock,
    MulticastBlockSent,
    MulticastBlockReceived,
    MulticastReadFailed,
}

impl AlertKind for Kind {
    fn parent(self) -> Option<Self> {
        match self {
            Kind::Torrent | Kind::Multicast => None,
            Kind::ReadPiece | Kind::PieceFinished | Kind::HashFailed => Some(Kind::Torrent),
            Kind::MulticastInvalid
            | Kind::MulticastDuplicate
            | Kind::MulticastBlock
            | Kind::MulticastReadFailed => Some(Kind::Multicast),
            Kind::MulticastBlockSent | Kind::MulticastBlockReceived => Some(Kind::MulticastBlock),
        }
    }
}

/// 잘못된 메시지 사유
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidMessage {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("negative field: piece {piece}, offset {offset}")]
    NegativeField { piece: i32, offset: i32 },

    #[error("unknown piece: {piece}")]
    UnknownPiece { piece: u32 },

    #[error("piece {piece}: {source}")]
    Range { piece: u32, source: RangeError },
}

/// 세션 알림
#[derive(Debug, Clone)]
pub enum Alert {
    /// 엔진의 피스 읽기 완료. 실패 시 `buffer`는 `None`
    ReadPiece { piece: u32, buffer: Option<Bytes> },

    /// 엔진이 피스를 검증하고 저장함
    PieceFinished { piece: u32 },

    /// 커밋된 피스가 검증에 실패함
    HashFailed { piece: u32 },

    /// 일반 멀티캐스트 알림
    Multicast(String),

    Invalid {
        from: SocketAddr,
        reason: InvalidMessage,
    },

    Duplicate { piece: u32 },

    BlockSent {
        piece: u32,
        offset: usize,
        length: usize,
        to: SocketAddr,
    },

    BlockReceived {
        piece: u32,
        offset: usize,
        length: usize,
        from: SocketAddr,
    },

    ReadFailed { piece: u32 },
}

impl Classified for Alert {
    type Kind = Kind;

    fn kind(&self) -> Kind {
        match self {
            Alert::ReadPiece { .. } => Kind::ReadPiece,
            Alert::PieceFinished { .. } => Kind::PieceFinished,
            Alert::HashFailed { .. } => Kind::HashFailed,
            Alert::Multicast(_) => Kind::Multicast,
            Alert::Invalid { .. } => Kind::MulticastInvalid,
            Alert::Duplicate { .. } => Kind::MulticastDuplicate,
            Alert::BlockSent { .. } => Kind::MulticastBlockSent,
            Alert::BlockReceived { .. } => Kind::MulticastBlockReceived,
            Alert::ReadFailed { .. } => Kind::MulticastReadFailed,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::ReadPiece {
                piece,
                buffer: Some(buffer),
            } => write!(f, "read piece {} ({} bytes)", piece, buffer.len()),
            Alert::ReadPiece { piece, buffer: None } => write!(f, "read piece {} failed", piece),
            Alert::PieceFinished { piece } => write!(f, "piece {} finished", piece),
            Alert::HashFailed { piece } => write!(f, "piece {} failed hash check", piece),
            Alert::Multicast(msg) => write!(f, "multicast: {}", msg),
            Alert::Invalid { from, reason } => {
                write!(f, "multicast: received invalid message from {}: {}", from, reason)
            }
            Alert::Duplicate { piece } => {
                write!(f, "multicast: received a block we already have (piece {})", piece)
            }
            Alert::BlockSent {
                piece,
                offset,
                length,
                to,
            } => write!(
                f,
                "multicast: sent block ({}, {}) of piece {} to {}",
                offset, length, piece, to
            ),
            Alert::BlockReceived {
                piece,
                offset,
                length,
                from,
            } => write!(
                f,
                "multicast: received block ({}, {}) of piece {} from {}",
                offset, length, piece, from
            ),
            Alert::ReadFailed { piece } => write!(f, "multicast: failed to read piece {}", piece),
        }
    }
}

/// 세션 알림 버스
pub type Alerts = AlertBus<Alert>;
