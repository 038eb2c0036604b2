//! 토렌트 엔진 인터페이스
//!
//! 메타데이터 파싱, 피스 검증/저장, 비동기 피스 읽기는 외부 엔진의 몫이다.
//! 송수신 루프는 `TorrentEngine` 트레이트만 본다.
//!
//! `MemoryTorrent`는 메모리에 피스를 두는 참조 구현이다 (테스트 / 데모용).
//! 피스별 CRC32로 커밋된 데이터를 검증한다.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::alerts::{Alert, Alerts};

/// 피스 커밋 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitFlags(u32);

impl CommitFlags {
    pub const NONE: Self = Self(0);

    /// 이미 가진 피스도 덮어씀
    pub const OVERWRITE_EXISTING: Self = Self(1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// 토렌트 엔진 계약
///
/// 엔진은 자체적으로 동기화되어 있어야 하며, 여러 루프에서 동시에 호출될 수 있다.
pub trait TorrentEngine: Send + Sync {
    /// 피스 개수
    fn num_pieces(&self) -> u32;

    /// 피스 길이. 범위를 벗어난 인덱스면 `None`
    fn piece_size(&self, piece: u32) -> Option<usize>;

    /// 검증된 피스를 이미 가지고 있는지
    fn has_piece(&self, piece: u32) -> bool;

    /// 검증 완료된 피스 인덱스 집합
    fn available_pieces(&self) -> BTreeSet<u32>;

    /// 비동기 피스 읽기 요청
    ///
    /// 결과는 `Alert::ReadPiece { piece, buffer }`로 세션 알림 버스에 전달된다.
    fn request_read(&self, piece: u32);

    /// 조립 완료된 피스 저장
    fn commit_piece(&self, piece: u32, data: Bytes, flags: CommitFlags);
}

/// 메모리 기반 토렌트
pub struct MemoryTorrent {
    piece_length: usize,
    total_size: usize,
    checksums: Vec<u32>,
    pieces: RwLock<Vec<Option<Bytes>>>,
    unreadable: RwLock<HashSet<u32>>,
    commits: AtomicU64,
    alerts: Arc<Alerts>,
}

impl MemoryTorrent {
    /// 전체 데이터를 가진 (시드) 토렌트
    pub fn seeded(data: Bytes, piece_length: usize, alerts: Arc<Alerts>) -> Self {
        let piece_length = piece_length.max(1);
        let pieces: Vec<Option<Bytes>> = (0..data.len())
            .step_by(piece_length)
            .map(|start| Some(data.slice(start..(start + piece_length).min(data.len()))))
            .collect();
        let checksums = pieces
            .iter()
            .flatten()
            .map(|piece| crc32fast::hash(piece))
            .collect();

        Self {
            piece_length,
            total_size: data.len(),
            checksums,
            pieces: RwLock::new(pieces),
            unreadable: RwLock::new(HashSet::new()),
            commits: AtomicU64::new(0),
            alerts,
        }
    }

    /// 같은 메타데이터를 가진 빈 토렌트 (수신측)
    pub fn empty_like(&self, alerts: Arc<Alerts>) -> Self {
        Self {
            piece_length: self.piece_length,
            total_size: self.total_size,
            checksums: self.checksums.clone(),
            pieces: RwLock::new(vec![None; self.checksums.len()]),
            unreadable: RwLock::new(HashSet::new()),
            commits: AtomicU64::new(0),
            alerts,
        }
    }

    pub fn piece_length(&self) -> usize {
        self.piece_length
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// 모든 피스를 가졌는지
    pub fn is_finished(&self) -> bool {
        self.pieces.read().iter().all(Option::is_some)
    }

    /// 가진 피스 수
    pub fn have_count(&self) -> usize {
        self.pieces.read().iter().filter(|p| p.is_some()).count()
    }

    /// 피스 데이터
    pub fn piece(&self, piece: u32) -> Option<Bytes> {
        self.pieces.read().get(piece as usize).cloned().flatten()
    }

    /// 전체 데이터 (완료된 경우만)
    pub fn content(&self) -> Option<Bytes> {
        let pieces = self.pieces.read();
        let mut content = Vec::with_capacity(self.total_size);
        for piece in pieces.iter() {
            content.extend_from_slice(piece.as_ref()?);
        }
        Some(content.into())
    }

    /// `commit_piece` 호출 횟수
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// 이후 읽기 요청이 실패하도록 표시
    pub fn mark_unreadable(&self, piece: u32) {
        self.unreadable.write().insert(piece);
    }
}

impl TorrentEngine for MemoryTorrent {
    fn num_pieces(&self) -> u32 {
        self.checksums.len() as u32
    }

    fn piece_size(&self, piece: u32) -> Option<usize> {
        let start = (piece as usize).checked_mul(self.piece_length)?;
        if piece >= self.num_pieces() {
            return None;
        }
        Some(self.piece_length.min(self.total_size - start))
    }

    fn has_piece(&self, piece: u32) -> bool {
        matches!(self.pieces.read().get(piece as usize), Some(Some(_)))
    }

    fn available_pieces(&self) -> BTreeSet<u32> {
        self.pieces
            .read()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// 메모리에서 바로 읽으므로 알림이 즉시 발행된다
    fn request_read(&self, piece: u32) {
        let buffer = if self.unreadable.read().contains(&piece) {
            None
        } else {
            self.piece(piece)
        };
        self.alerts.emit(&Alert::ReadPiece { piece, buffer });
    }

    fn commit_piece(&self, piece: u32, data: Bytes, flags: CommitFlags) {
        self.commits.fetch_add(1, Ordering::Relaxed);

        let Some(&expected) = self.checksums.get(piece as usize) else {
            warn!("존재하지 않는 피스 커밋: {}", piece);
            return;
        };
        if self.has_piece(piece) && !flags.contains(CommitFlags::OVERWRITE_EXISTING) {
            debug!("이미 가진 피스 커밋 무시: {}", piece);
            return;
        }

        let valid = Some(data.len()) == self.piece_size(piece) && crc32fast::hash(&data) == expected;
        if !valid {
            warn!("피스 {} 검증 실패", piece);
            self.alerts.emit(&Alert::HashFailed { piece });
            return;
        }

        self.pieces.write()[piece as usize] = Some(data);
        self.alerts.emit(&Alert::PieceFinished { piece });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Kind;
    use parking_lot::Mutex;

    fn data(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_seeded_layout() {
        let alerts = Arc::new(Alerts::new());
        let torrent = MemoryTorrent::seeded(data(250), 100, alerts);

        assert_eq!(torrent.num_pieces(), 3);
        assert_eq!(torrent.piece_size(0), Some(100));
        assert_eq!(torrent.piece_size(2), Some(50));
        assert_eq!(torrent.piece_size(3), None);
        assert_eq!(torrent.piece_size(u32::MAX), None);
        assert!(torrent.is_finished());
        assert_eq!(torrent.available_pieces(), BTreeSet::from([0, 1, 2]));
        assert_eq!(torrent.content(), Some(data(250)));
    }

    #[test]
    fn test_read_emits_alert() {
        let alerts = Arc::new(Alerts::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        alerts.on(Kind::ReadPiece, move |a: &Alert| {
            if let Alert::ReadPiece { piece, buffer } = a {
                sink.lock().push((*piece, buffer.as_ref().map(|b| b.len())));
            }
        });

        let torrent = MemoryTorrent::seeded(data(250), 100, alerts);
        torrent.request_read(2);
        torrent.mark_unreadable(1);
        torrent.request_read(1);
        torrent.request_read(9);

        assert_eq!(*seen.lock(), vec![(2, Some(50)), (1, None), (9, None)]);
    }

    #[test]
    fn test_commit_verifies() {
        let alerts = Arc::new(Alerts::new());
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        alerts.on(Kind::Torrent, move |a: &Alert| sink.lock().push(a.to_string()));

        let seed = MemoryTorrent::seeded(data(250), 100, alerts.clone());
        let torrent = seed.empty_like(alerts);
        assert!(torrent.available_pieces().is_empty());

        torrent.commit_piece(1, Bytes::from(vec![0u8; 100]), CommitFlags::NONE);
        assert!(!torrent.has_piece(1));

        torrent.commit_piece(1, seed.piece(1).unwrap(), CommitFlags::NONE);
        assert!(torrent.has_piece(1));
        assert_eq!(torrent.commit_count(), 2);
        assert_eq!(
            *finished.lock(),
            vec!["piece 1 failed hash check", "piece 1 finished"]
        );
        assert!(!torrent.is_finished());
        assert_eq!(torrent.content(), None);
    }
}
