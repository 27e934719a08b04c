//! 定位探测
//!
//! `probe`：发出 `/locraw`，在超时内等待定位报告，结果为 AtTarget / AtOther / Unknown。
//! `wait_for_arrival`：先等待服务器的强制位移（换服完成），稍作停顿后再探测。
//! 同一会话上同一时刻只允许一个探测处于监听状态，由内部互斥锁串行化。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{ms, AppConfig};
use crate::core::classifier::{classify, ClassifiedEvent};
use crate::core::wait::Listener;
use crate::session::{Session, SessionError, SessionEvent};

/// 定位查询命令
pub const LOCATION_QUERY: &str = "/locraw";

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationState {
    /// 超时未收到定位报告（调用方按「不在目标处」处理）
    Unknown,
    AtTarget,
    AtOther(String),
}

impl LocationState {
    pub fn is_at_target(&self) -> bool {
        matches!(self, LocationState::AtTarget)
    }
}

/// 定位探测器
pub struct LocationProbe {
    session: Arc<dyn Session>,
    target: String,
    timeout: Duration,
    forced_move_settle: Duration,
    armed: Mutex<()>,
}

impl LocationProbe {
    pub fn new(session: Arc<dyn Session>, config: &AppConfig) -> Self {
        Self {
            session,
            target: config.location.target.clone(),
            timeout: ms(config.timings.probe_timeout_ms),
            forced_move_settle: ms(config.timings.forced_move_settle_ms),
            armed: Mutex::new(()),
        }
    }

    /// 查询当前位置
    pub async fn probe(&self) -> Result<LocationState, SessionError> {
        let _armed = self.armed.lock().await;
        self.query().await
    }

    /// 挂载强制位移监听；须在发出传送命令之前调用，再交给 `wait_for_arrival`
    pub fn forced_move_listener(&self) -> Listener {
        Listener::attach(self.session.as_ref(), "forced-move")
    }

    /// 等待强制位移后确认是否已到达目标；超时未位移返回 false
    pub async fn wait_for_arrival(&self, mut forced_move: Listener) -> Result<bool, SessionError> {
        let _armed = self.armed.lock().await;

        let moved = forced_move
            .wait_for(self.timeout, |event| {
                matches!(event, SessionEvent::ForcedMove).then_some(())
            })
            .await?;
        drop(forced_move);

        if moved.is_none() {
            tracing::debug!("No forced move within {:?}", self.timeout);
            return Ok(false);
        }

        tracing::info!("Forced move detected, checking if we are in our island");
        tokio::time::sleep(self.forced_move_settle).await;
        Ok(self.query().await?.is_at_target())
    }

    async fn query(&self) -> Result<LocationState, SessionError> {
        let mut listener = Listener::attach(self.session.as_ref(), "location");
        self.session.chat(LOCATION_QUERY).await?;

        let report = listener
            .wait_for(self.timeout, |event| match classify(event.text()?) {
                ClassifiedEvent::LocationReport(map) => Some(map),
                _ => None,
            })
            .await?;

        Ok(match report {
            Some(map) if map == self.target => LocationState::AtTarget,
            Some(map) => LocationState::AtOther(map),
            None => LocationState::Unknown,
        })
    }
}
