//! 在岛巡检：固定间隔探测位置，不在目标处时从大厅重新走一遍恢复流程
//!
//! 巡检本身不设上限，只有编排器内部的传送预算有上限。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ms, TimingsSection};
use crate::core::budget::RetryBudget;
use crate::core::orchestrator::{RecoveryOrchestrator, Stage};
use crate::core::probe::{LocationProbe, LocationState};
use crate::core::CoffeeError;

/// 在岛巡检
pub struct PresenceMonitor {
    probe: Arc<LocationProbe>,
    interval: Duration,
    recovery_delay: Duration,
    step: Duration,
}

impl PresenceMonitor {
    pub fn new(probe: Arc<LocationProbe>, timings: &TimingsSection) -> Self {
        Self {
            probe,
            interval: ms(timings.monitor_interval_ms),
            recovery_delay: ms(timings.monitor_recovery_ms),
            step: ms(timings.monitor_step_ms),
        }
    }

    /// 无限巡检；仅在致命错误或会话失效时返回
    pub async fn run(
        &self,
        orchestrator: &RecoveryOrchestrator,
        budget: &mut RetryBudget,
    ) -> Result<(), CoffeeError> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // 恢复流程可能超过一个周期，跳过积压的 tick
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.check_once(orchestrator, budget).await?;
        }
    }

    /// 单次巡检：探测一次，必要时执行恢复
    pub async fn check_once(
        &self,
        orchestrator: &RecoveryOrchestrator,
        budget: &mut RetryBudget,
    ) -> Result<LocationState, CoffeeError> {
        let state = self.probe.probe().await?;
        if state.is_at_target() {
            tracing::info!("We are still in our island");
            return Ok(state);
        }

        tracing::info!(
            "We are not in our island ({:?}), teleporting in {} seconds",
            state,
            self.recovery_delay.as_secs()
        );
        orchestrator
            .run(
                Stage::RecoveringViaLobby {
                    resume_after: self.step,
                },
                self.recovery_delay,
                budget,
            )
            .await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::probe::LOCATION_QUERY;
    use crate::session::{MockSession, SessionEvent};

    #[tokio::test(start_paused = true)]
    async fn test_at_target_does_nothing() {
        let session = Arc::new(MockSession::new());
        session.on(
            LOCATION_QUERY,
            vec![SessionEvent::chat(r#""map":"Private Island"}"#)],
        );
        let config = AppConfig::default();
        let probe = Arc::new(LocationProbe::new(session.clone(), &config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe.clone(), &config);
        let monitor = PresenceMonitor::new(probe, &config.timings);
        let mut budget = RetryBudget::fatal_at("teleport", 10);

        let state = monitor.check_once(&orchestrator, &mut budget).await.unwrap();
        assert_eq!(state, LocationState::AtTarget);
        assert_eq!(session.commands(), vec![LOCATION_QUERY.to_string()]);
    }
}
