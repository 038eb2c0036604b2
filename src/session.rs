//! 세션
//!
//! 알림 버스와 설정을 소유하고 토렌트별 송수신 루프를 태스크로 띄운다.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::alerts::{Alert, Alerts, Kind, ListenerId};
use crate::engine::TorrentEngine;
use crate::receiver::ReceiveLoop;
use crate::sender::{PieceOrder, SendLoop};
use crate::stats::TransferStats;
use crate::{Config, Result};

/// 실행 중인 루프 핸들
///
/// 핸들을 drop 해도 루프는 멈추지 않는다. `stop()` 또는 `shutdown()`을 호출할 것.
pub struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<RwLock<TransferStats>>,
}

impl LoopHandle {
    /// 정지 요청. 루프는 다음 확인 지점에서 끝난다.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 현재 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 루프 종료 대기
    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }

    /// 정지 요청 후 종료 대기
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

/// 멀티캐스트 세션
pub struct Session {
    alerts: Arc<Alerts>,
    config: Config,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            alerts: Arc::new(Alerts::new()),
            config,
        }
    }

    /// 세션 알림 버스. 엔진은 읽기 완료 알림을 여기로 보내야 한다.
    pub fn alerts(&self) -> Arc<Alerts> {
        self.alerts.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 리스너 등록
    pub fn on<F>(&self, kind: Kind, callback: F) -> ListenerId
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.alerts.on(kind, callback)
    }

    /// 리스너 해제
    pub fn off(&self, id: ListenerId) -> bool {
        self.alerts.off(id)
    }

    /// 알림 발행
    pub fn emit(&self, alert: &Alert) {
        self.alerts.emit(alert);
    }

    /// 송신 루프 시작
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn multicast_send(
        &self,
        engine: Arc<dyn TorrentEngine>,
        dest: SocketAddr,
        order: PieceOrder,
    ) -> Result<LoopHandle> {
        let send = SendLoop::new(engine, dest, self.config.clone(), order, self.alerts.clone())?;
        let stats = send.stats();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));
        debug!("송신 루프 생성: {}", dest);

        Ok(LoopHandle {
            cancel,
            task,
            stats,
        })
    }

    /// 수신 루프 시작. 그룹 가입은 반환 전에 끝난다.
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn multicast_recv(
        &self,
        engine: Arc<dyn TorrentEngine>,
        group: SocketAddr,
    ) -> Result<LoopHandle> {
        let recv = ReceiveLoop::new(engine, group, self.config.clone(), self.alerts.clone())?;
        let stats = recv.stats();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        debug!("수신 루프 생성: {}", group);

        Ok(LoopHandle {
            cancel,
            task,
            stats,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
