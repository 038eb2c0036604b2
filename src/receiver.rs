//! 수신 루프
//!
//! - 멀티캐스트 그룹에서 블록 수신 및 검증
//! - 피스별 구간 추적으로 순서와 무관하게 조립
//! - 완성된 피스를 엔진에 커밋

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, Alerts, InvalidMessage};
use crate::engine::{CommitFlags, TorrentEngine};
use crate::multicast::{Family, MulticastSocket};
use crate::packet::Packet;
use crate::piece::PieceBuffer;
use crate::progress::RangeError;
use crate::stats::TransferStats;
use crate::{Config, Result};

/// 피스 조립기 (수신 루프 내부 상태, 단일 태스크에서만 접근)
pub struct Reassembler {
    engine: Arc<dyn TorrentEngine>,
    alerts: Arc<Alerts>,
    stats: Arc<RwLock<TransferStats>>,
    incoming: HashMap<u32, PieceBuffer>,
}

impl Reassembler {
    pub fn new(engine: Arc<dyn TorrentEngine>, alerts: Arc<Alerts>) -> Self {
        Self {
            engine,
            alerts,
            stats: Arc::new(RwLock::new(TransferStats::new())),
            incoming: HashMap::new(),
        }
    }

    /// 통계 공유 핸들
    pub fn stats(&self) -> Arc<RwLock<TransferStats>> {
        self.stats.clone()
    }

    /// 조립 중인 피스 수
    pub fn in_progress(&self) -> usize {
        self.incoming.len()
    }

    /// 데이터그램 하나 처리
    pub fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => return self.invalid(from, e.into()),
        };

        let (Ok(piece), Ok(offset)) = (
            u32::try_from(packet.piece_index),
            usize::try_from(packet.block_offset),
        ) else {
            return self.invalid(
                from,
                InvalidMessage::NegativeField {
                    piece: packet.piece_index,
                    offset: packet.block_offset,
                },
            );
        };

        // 이미 가진 피스면 조립 중인 버퍼도 버림
        if self.engine.has_piece(piece) {
            self.incoming.remove(&piece);
            return self.duplicate(piece);
        }

        let Some(piece_size) = self.engine.piece_size(piece) else {
            return self.invalid(from, InvalidMessage::UnknownPiece { piece });
        };

        let length = packet.payload.len();
        let buffer = self
            .incoming
            .entry(piece)
            .or_insert_with(|| PieceBuffer::new(piece, piece_size));
        let inserted = buffer.add_block(offset, &packet.payload);
        let untouched = buffer.progress().covered() == 0;
        let complete = buffer.is_complete();

        match inserted {
            Ok(()) => {}
            Err(RangeError::AlreadyHave { .. }) => return self.duplicate(piece),
            Err(source) => {
                if untouched {
                    self.incoming.remove(&piece);
                }
                return self.invalid(from, InvalidMessage::Range { piece, source });
            }
        }

        self.stats.write().record_block(length);
        self.alerts.emit(&Alert::BlockReceived {
            piece,
            offset,
            length,
            from,
        });

        if complete {
            if let Some(buffer) = self.incoming.remove(&piece) {
                let elapsed = buffer.created_at.elapsed();
                let data = buffer.into_data();
                debug!(
                    "피스 {} 조립 완료: {} bytes, {:.2}ms",
                    piece,
                    data.len(),
                    elapsed.as_secs_f64() * 1000.0
                );
                self.engine.commit_piece(piece, data, CommitFlags::NONE);
                self.stats.write().completed_pieces += 1;
            }
        }
    }

    /// 소켓 수신 결과 하나 처리
    ///
    /// 타임아웃이 아닌 소켓 에러면 `true`. 호출측은 재시도 전에 잠시 쉰다.
    pub fn handle_received(
        &mut self,
        received: Result<Option<(usize, SocketAddr)>>,
        buf: &[u8],
    ) -> bool {
        match received {
            Ok(Some((len, from))) => {
                self.handle_datagram(&buf[..len.min(buf.len())], from);
                false
            }
            // 타임아웃, 계속
            Ok(None) => false,
            Err(e) => {
                warn!("수신 에러: {}", e);
                true
            }
        }
    }

    fn invalid(&self, from: SocketAddr, reason: InvalidMessage) {
        debug!("잘못된 메시지 ({}): {}", from, reason);
        self.stats.write().invalid_messages += 1;
        self.alerts.emit(&Alert::Invalid { from, reason });
    }

    fn duplicate(&self, piece: u32) {
        self.stats.write().duplicate_blocks += 1;
        self.alerts.emit(&Alert::Duplicate { piece });
    }
}

/// 수신 루프
pub struct ReceiveLoop {
    socket: MulticastSocket,
    config: Config,
    inner: Reassembler,
}

impl ReceiveLoop {
    /// 그룹에 가입한 소켓을 만든다. 설정 오류는 여기서 반환된다.
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        group: SocketAddr,
        config: Config,
        alerts: Arc<Alerts>,
    ) -> Result<Self> {
        let mut socket = MulticastSocket::new(
            Family::of(&group.ip()).domain(),
            config.ttl,
            config.multicast_loop,
        )?;
        socket.join_group(group.ip(), group.port())?;

        Ok(Self {
            socket,
            config,
            inner: Reassembler::new(engine, alerts),
        })
    }

    /// 통계 공유 핸들
    pub fn stats(&self) -> Arc<RwLock<TransferStats>> {
        self.inner.stats()
    }

    /// 정지 신호까지 실행
    ///
    /// 정지 신호는 수신 대기 직전에 확인한다. 수신 타임아웃이 확인 주기가 된다.
    pub async fn run(mut self, cancel: CancellationToken) {
        let group = self.socket.group();
        info!("멀티캐스트 수신 시작: {:?}", group);
        if let Some(group) = group {
            self.inner
                .alerts
                .emit(&Alert::Multicast(format!("receiving on {}", group)));
        }

        let mut buf = vec![0u8; self.config.recv_buffer_size];
        while !cancel.is_cancelled() {
            let received = self.socket.recv_timeout(&mut buf, self.config.recv_timeout).await;
            if self.inner.handle_received(received, &buf) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.recv_timeout) => {}
                }
            }
        }

        info!(
            "멀티캐스트 수신 종료 (조립 중 {}개 버림): {}",
            self.inner.in_progress(),
            self.inner.stats.read().summary()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::time::Duration;

    use bytes::{BufMut, Bytes, BytesMut};
    use parking_lot::Mutex;

    use crate::alerts::Kind;
    use crate::engine::MemoryTorrent;
    use crate::multicast::DEFAULT_GROUP_V4;
    use crate::packet::DecodeError;

    fn from() -> SocketAddr {
        "10.0.0.7:50000".parse().unwrap()
    }

    fn data(len: usize) -> Bytes {
        (0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>().into()
    }

    /// 시드 토렌트와 같은 메타데이터의 빈 토렌트 + 조립기
    fn setup(content: Bytes, piece_length: usize) -> (Arc<MemoryTorrent>, Reassembler, Arc<Alerts>) {
        let alerts = Arc::new(Alerts::new());
        let seed = MemoryTorrent::seeded(content, piece_length, alerts.clone());
        let torrent = Arc::new(seed.empty_like(alerts.clone()));
        let inner = Reassembler::new(torrent.clone(), alerts.clone());
        (torrent, inner, alerts)
    }

    fn record(alerts: &Alerts, kind: Kind) -> Arc<Mutex<Vec<Alert>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        alerts.on(kind, move |a: &Alert| sink.lock().push(a.clone()));
        seen
    }

    fn block(piece: i32, offset: usize, content: &Bytes, len: usize) -> Bytes {
        Packet::new(piece, offset as i32, content.slice(offset..offset + len)).encode()
    }

    /// 피스 길이가 `piece_length`인 토렌트에서 피스 내부 오프셋의 블록
    fn piece_block(piece: u32, piece_length: usize, offset: usize, content: &Bytes, len: usize) -> Bytes {
        let start = piece as usize * piece_length + offset;
        Packet::new(piece as i32, offset as i32, content.slice(start..start + len)).encode()
    }

    #[test]
    fn test_two_blocks_any_order_single_commit() {
        let content = data(200);
        for reverse in [false, true] {
            let (torrent, mut inner, _) = setup(content.clone(), 200);
            let mut datagrams = vec![block(0, 0, &content, 120), block(0, 120, &content, 80)];
            if reverse {
                datagrams.reverse();
            }

            inner.handle_datagram(&datagrams[0], from());
            assert_eq!(torrent.commit_count(), 0);
            assert_eq!(inner.in_progress(), 1);

            inner.handle_datagram(&datagrams[1], from());
            assert_eq!(torrent.commit_count(), 1);
            assert_eq!(inner.in_progress(), 0);
            assert_eq!(torrent.piece(0), Some(content.clone()));
        }
    }

    #[test]
    fn test_duplicate_after_commit() {
        let content = data(100);
        let (torrent, mut inner, alerts) = setup(content.clone(), 100);
        let dups = record(&alerts, Kind::MulticastDuplicate);

        inner.handle_datagram(&block(0, 0, &content, 100), from());
        assert!(torrent.has_piece(0));

        inner.handle_datagram(&block(0, 0, &content, 100), from());
        inner.handle_datagram(&block(0, 50, &content, 50), from());
        assert_eq!(torrent.commit_count(), 1);
        assert_eq!(dups.lock().len(), 2);
        assert_eq!(inner.stats().read().duplicate_blocks, 2);
    }

    #[test]
    fn test_duplicate_block_in_progress() {
        let content = data(100);
        let (torrent, mut inner, alerts) = setup(content.clone(), 100);
        let dups = record(&alerts, Kind::MulticastDuplicate);
        let received = record(&alerts, Kind::MulticastBlockReceived);

        inner.handle_datagram(&block(0, 0, &content, 60), from());
        inner.handle_datagram(&block(0, 10, &content, 20), from());

        assert_eq!(dups.lock().len(), 1);
        assert_eq!(received.lock().len(), 1);
        assert_eq!(torrent.commit_count(), 0);
        assert_eq!(inner.in_progress(), 1);
    }

    #[test]
    fn test_invalid_messages() {
        let content = data(100);
        let (torrent, mut inner, alerts) = setup(content.clone(), 100);
        let invalid = record(&alerts, Kind::MulticastInvalid);

        // 너무 짧음
        inner.handle_datagram(b"short", from());
        // 알 수 없는 타입
        let mut wrong_type = BytesMut::from(&block(0, 0, &content, 10)[..]);
        wrong_type[4] = 1;
        inner.handle_datagram(&wrong_type, from());
        // 길이 불일치
        let mut padded = BytesMut::from(&block(0, 0, &content, 10)[..]);
        padded.put_u8(0);
        inner.handle_datagram(&padded, from());
        // 음수 필드
        inner.handle_datagram(
            &Packet::new(-1, 0, Bytes::from_static(b"x")).encode(),
            from(),
        );
        // 없는 피스
        inner.handle_datagram(&Packet::new(5, 0, Bytes::from_static(b"x")).encode(), from());
        // 피스 범위 밖
        inner.handle_datagram(
            &Packet::new(0, 95, Bytes::from(vec![0u8; 10])).encode(),
            from(),
        );

        let reasons: Vec<InvalidMessage> = invalid
            .lock()
            .iter()
            .filter_map(|a| match a {
                Alert::Invalid { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reasons.len(), 6);
        assert_eq!(
            reasons[0],
            InvalidMessage::Decode(DecodeError::TooShort { len: 5 })
        );
        assert_eq!(
            reasons[1],
            InvalidMessage::Decode(DecodeError::UnknownType { msg_type: 1 })
        );
        assert!(matches!(
            reasons[2],
            InvalidMessage::Decode(DecodeError::LengthMismatch { .. })
        ));
        assert_eq!(
            reasons[3],
            InvalidMessage::NegativeField {
                piece: -1,
                offset: 0
            }
        );
        assert_eq!(reasons[4], InvalidMessage::UnknownPiece { piece: 5 });
        assert!(matches!(
            reasons[5],
            InvalidMessage::Range {
                piece: 0,
                source: RangeError::OutOfBounds { .. }
            }
        ));

        // 잘못된 블록만 받은 피스는 버퍼를 남기지 않음
        assert_eq!(inner.in_progress(), 0);
        assert_eq!(torrent.commit_count(), 0);
        assert_eq!(inner.stats().read().invalid_messages, 6);
    }

    #[test]
    fn test_interleaved_pieces_commit_in_arrival_order() {
        let content = data(300);
        let (torrent, mut inner, alerts) = setup(content.clone(), 100);
        let finished = record(&alerts, Kind::PieceFinished);

        inner.handle_datagram(&piece_block(2, 100, 50, &content, 50), from());
        inner.handle_datagram(&piece_block(0, 100, 0, &content, 50), from());
        inner.handle_datagram(&piece_block(2, 100, 0, &content, 50), from());
        inner.handle_datagram(&piece_block(1, 100, 0, &content, 100), from());
        inner.handle_datagram(&piece_block(0, 100, 50, &content, 50), from());

        let order: Vec<u32> = finished
            .lock()
            .iter()
            .filter_map(|a| match a {
                Alert::PieceFinished { piece } => Some(*piece),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(torrent.is_finished());
        assert_eq!(torrent.content(), Some(content));
    }

    #[test]
    fn test_socket_error_requests_backoff() {
        let content = data(100);
        let (torrent, mut inner, _) = setup(content.clone(), 100);
        let buf = block(0, 0, &content, 100);

        let error = crate::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "network unreachable",
        ));
        assert!(inner.handle_received(Err(error), &buf));
        assert!(!inner.handle_received(Ok(None), &buf));
        assert_eq!(torrent.commit_count(), 0);

        assert!(!inner.handle_received(Ok(Some((buf.len(), from()))), &buf));
        assert_eq!(torrent.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_receive_loop_stops_within_timeout() {
        let alerts = Arc::new(Alerts::new());
        let seed = MemoryTorrent::seeded(data(10), 10, alerts.clone());
        let torrent = Arc::new(seed.empty_like(alerts.clone()));
        let config = Config {
            recv_timeout: Duration::from_millis(100),
            ..Config::local_test()
        };
        let group = SocketAddr::new(IpAddr::V4(DEFAULT_GROUP_V4), 50125);

        let recv = match ReceiveLoop::new(torrent, group, config.clone(), alerts) {
            Ok(recv) => recv,
            Err(e) => {
                eprintln!("멀티캐스트 그룹 가입 불가 ({}), 테스트 건너뜀", e);
                return;
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(config.recv_timeout + Duration::from_millis(200), task)
            .await
            .expect("수신 타임아웃 한 번 안에 멈춰야 함")
            .unwrap();
    }
}
