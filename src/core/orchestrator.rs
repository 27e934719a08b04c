//! 恢复编排器：从「位置未知」走到「目标岛屿」的有限状态机
//!
//! 阶段：
//! - **JoiningTarget**：`/play sb`，等待进入 SkyBlock 的欢迎语或错误
//! - **RecoveringViaLobby**：`/l`，以大厅确认语或重新出生为准
//! - **JoiningFinalStage**：`/is` 或 `/visit <玩家>`，等待强制位移并确认位置
//!
//! 转移表由纯函数 `transition` 给出，`run` 负责执行阶段、等待延迟并推进。
//! 传送预算在所有阶段间共享且不重置，耗尽即返回致命错误。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ms, AppConfig, JoinMode, TimingsSection};
use crate::core::budget::RetryBudget;
use crate::core::classifier::{classify, has_error_phrase, ClassifiedEvent, SuccessKind};
use crate::core::probe::LocationProbe;
use crate::core::wait::Listener;
use crate::core::window::click_teleport_item;
use crate::core::CoffeeError;
use crate::session::{Session, SessionEvent};

pub const JOIN_TARGET_COMMAND: &str = "/play sb";
pub const LOBBY_COMMAND: &str = "/l";
pub const ISLAND_COMMAND: &str = "/is";

/// 编排阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    JoiningTarget,
    /// 到达大厅后，等待 `resume_after` 再重新进入 JoiningTarget
    RecoveringViaLobby { resume_after: Duration },
    JoiningFinalStage,
}

/// 单个阶段的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    HubJoined,
    /// 被服务器拒绝，载荷为触发行
    Rejected(String),
    LobbyReached,
    Arrived,
    NotArrived,
}

/// 状态转移
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next { stage: Stage, after: Duration },
    /// 已到达目标
    Done,
}

/// 转移表；失败结果会消耗预算，耗尽时返回致命错误
pub fn transition(
    stage: &Stage,
    outcome: StageOutcome,
    budget: &mut RetryBudget,
    timings: &TimingsSection,
) -> Result<Transition, CoffeeError> {
    let retry = ms(timings.stage_retry_ms);
    match (stage, outcome) {
        (Stage::JoiningTarget, StageOutcome::HubJoined) => Ok(Transition::Next {
            stage: Stage::JoiningFinalStage,
            after: ms(timings.hub_to_island_ms),
        }),
        (Stage::JoiningTarget, StageOutcome::Rejected(line)) => {
            tracing::warn!("Server rejected join: {}", line);
            let attempt = budget.charge().inspect_err(|_| {
                tracing::error!("Failed to join Skyblock, stopping program");
            })?;
            tracing::error!(
                "Failed to join Skyblock, trying again in {}s (retry number {}/{})",
                retry.as_secs(),
                attempt,
                budget.limit()
            );
            Ok(Transition::Next {
                stage: Stage::RecoveringViaLobby {
                    resume_after: retry,
                },
                after: retry,
            })
        }
        (Stage::RecoveringViaLobby { resume_after }, StageOutcome::LobbyReached) => {
            Ok(Transition::Next {
                stage: Stage::JoiningTarget,
                after: *resume_after,
            })
        }
        (Stage::JoiningFinalStage, StageOutcome::Arrived) => Ok(Transition::Done),
        (Stage::JoiningFinalStage, StageOutcome::NotArrived) => {
            let attempt = budget.charge().inspect_err(|_| {
                tracing::error!("Failed to teleport to island, stopping program");
            })?;
            tracing::error!(
                "Failed to teleport to island, trying again in {}s (retry number {}/{})",
                retry.as_secs(),
                attempt,
                budget.limit()
            );
            Ok(Transition::Next {
                stage: Stage::JoiningFinalStage,
                after: retry,
            })
        }
        (stage, outcome) => {
            tracing::warn!("Unexpected outcome {:?} in stage {:?}, re-entering", outcome, stage);
            Ok(Transition::Next {
                stage: stage.clone(),
                after: Duration::ZERO,
            })
        }
    }
}

/// 恢复编排器
pub struct RecoveryOrchestrator {
    session: Arc<dyn Session>,
    probe: Arc<LocationProbe>,
    join_mode: JoinMode,
    timings: TimingsSection,
    window_dump: PathBuf,
}

impl RecoveryOrchestrator {
    pub fn new(session: Arc<dyn Session>, probe: Arc<LocationProbe>, config: &AppConfig) -> Self {
        Self {
            session,
            probe,
            join_mode: config.visit.join_mode(),
            timings: config.timings.clone(),
            window_dump: PathBuf::from("window.json"),
        }
    }

    /// 设置窗口快照的写入路径
    pub fn with_window_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.window_dump = path.into();
        self
    }

    /// 从 JoiningTarget 开始完整走一遍
    pub async fn recover(&self, budget: &mut RetryBudget) -> Result<(), CoffeeError> {
        self.run(Stage::JoiningTarget, Duration::ZERO, budget).await
    }

    /// 等待 `delay` 后从 `entry` 开始推进，直到到达目标或预算耗尽
    pub async fn run(
        &self,
        entry: Stage,
        delay: Duration,
        budget: &mut RetryBudget,
    ) -> Result<(), CoffeeError> {
        let mut stage = entry;
        let mut delay = delay;
        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tracing::debug!("Entering stage {:?}", stage);
            let outcome = self.execute(&stage).await?;
            match transition(&stage, outcome, budget, &self.timings)? {
                Transition::Done => {
                    tracing::info!("Arrived at Island");
                    return Ok(());
                }
                Transition::Next { stage: next, after } => {
                    stage = next;
                    delay = after;
                }
            }
        }
    }

    async fn execute(&self, stage: &Stage) -> Result<StageOutcome, CoffeeError> {
        match stage {
            Stage::JoiningTarget => self.join_target().await,
            Stage::RecoveringViaLobby { .. } => self.return_to_lobby().await,
            Stage::JoiningFinalStage => self.join_final_stage().await,
        }
    }

    async fn join_target(&self) -> Result<StageOutcome, CoffeeError> {
        let mut listener = Listener::attach(self.session.as_ref(), "join-target");
        tokio::time::sleep(ms(self.timings.grace_ms)).await;
        self.session.chat(JOIN_TARGET_COMMAND).await?;

        let outcome = listener
            .wait_for(ms(self.timings.join_timeout_ms), |event| {
                let text = event.text()?;
                match classify(text) {
                    ClassifiedEvent::Success(SuccessKind::Hub) => Some(StageOutcome::HubJoined),
                    ClassifiedEvent::Error => Some(StageOutcome::Rejected(text.to_string())),
                    // 「已在岛上」的传送失败提示在此阶段仍是一次拒绝
                    ClassifiedEvent::Success(SuccessKind::AlreadyThere) if has_error_phrase(text) => {
                        Some(StageOutcome::Rejected(text.to_string()))
                    }
                    _ => None,
                }
            })
            .await?;

        Ok(match outcome {
            Some(StageOutcome::HubJoined) => {
                tracing::info!("Successfully joined Skyblock");
                StageOutcome::HubJoined
            }
            Some(other) => other,
            None => StageOutcome::Rejected(format!(
                "no response to {} within {}ms",
                JOIN_TARGET_COMMAND, self.timings.join_timeout_ms
            )),
        })
    }

    async fn return_to_lobby(&self) -> Result<StageOutcome, CoffeeError> {
        let mut listener = Listener::attach(self.session.as_ref(), "lobby");
        tracing::info!("Teleporting to Lobby");
        self.session.chat(LOBBY_COMMAND).await?;

        // 大厅确认语与重新出生，先到者胜；此阶段不设超时
        listener
            .next_match(|event| match event {
                SessionEvent::Spawn => Some(()),
                other => other
                    .text()
                    .filter(|text| classify(text) == ClassifiedEvent::Success(SuccessKind::Lobby))
                    .map(|_| ()),
            })
            .await?;
        drop(listener);

        tokio::time::sleep(ms(self.timings.settle_ms)).await;
        tracing::info!("Successfully arrived at Lobby");
        Ok(StageOutcome::LobbyReached)
    }

    async fn join_final_stage(&self) -> Result<StageOutcome, CoffeeError> {
        // 所有监听都须在发出命令前挂载
        let mut already_there = Listener::attach(self.session.as_ref(), "island-success");
        let forced_move = self.probe.forced_move_listener();
        let mut window = match self.join_mode {
            JoinMode::Visit { .. } => Some(Listener::attach(self.session.as_ref(), "visit-window")),
            JoinMode::Direct => None,
        };

        tokio::time::sleep(ms(self.timings.grace_ms)).await;

        match (&self.join_mode, window.as_mut()) {
            (JoinMode::Visit { peer }, Some(window)) => {
                tracing::info!("Teleporting to {}'s Island", peer);
                self.session.chat(&format!("/visit {}", peer)).await?;
                let clicked = click_teleport_item(
                    self.session.as_ref(),
                    window,
                    ms(self.timings.window_timeout_ms),
                    &self.window_dump,
                )
                .await?;
                if !clicked {
                    return Ok(StageOutcome::NotArrived);
                }
            }
            _ => {
                tracing::info!("Teleporting to Island");
                self.session.chat(ISLAND_COMMAND).await?;
            }
        }
        drop(window);

        let direct_success = already_there.next_match(|event| {
            event
                .text()
                .filter(|text| {
                    classify(text) == ClassifiedEvent::Success(SuccessKind::AlreadyThere)
                })
                .map(|_| ())
        });

        tokio::select! {
            biased;
            result = direct_success => {
                result?;
                Ok(StageOutcome::Arrived)
            }
            arrived = self.probe.wait_for_arrival(forced_move) => {
                Ok(if arrived? { StageOutcome::Arrived } else { StageOutcome::NotArrived })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probe::LOCATION_QUERY;
    use crate::session::MockSession;

    fn timings() -> TimingsSection {
        TimingsSection::default()
    }

    #[test]
    fn test_hub_joined_goes_to_final_stage_after_delay() {
        let mut budget = RetryBudget::fatal_at("teleport", 10);
        let t = transition(&Stage::JoiningTarget, StageOutcome::HubJoined, &mut budget, &timings())
            .unwrap();
        assert_eq!(
            t,
            Transition::Next {
                stage: Stage::JoiningFinalStage,
                after: Duration::from_millis(5000),
            }
        );
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_rejection_composes_lobby_recovery() {
        let mut budget = RetryBudget::fatal_at("teleport", 10);
        let t = transition(
            &Stage::JoiningTarget,
            StageOutcome::Rejected("Cannot join".to_string()),
            &mut budget,
            &timings(),
        )
        .unwrap();
        let retry = Duration::from_millis(20_000);
        assert_eq!(
            t,
            Transition::Next {
                stage: Stage::RecoveringViaLobby { resume_after: retry },
                after: retry,
            }
        );

        let t = transition(
            &Stage::RecoveringViaLobby { resume_after: retry },
            StageOutcome::LobbyReached,
            &mut budget,
            &timings(),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Next {
                stage: Stage::JoiningTarget,
                after: retry,
            }
        );
        assert_eq!(budget.used(), 1);
    }

    #[test]
    fn test_final_stage_failure_retries_itself() {
        let mut budget = RetryBudget::fatal_at("teleport", 10);
        let t = transition(
            &Stage::JoiningFinalStage,
            StageOutcome::NotArrived,
            &mut budget,
            &timings(),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Next {
                stage: Stage::JoiningFinalStage,
                after: Duration::from_millis(20_000),
            }
        );
        assert_eq!(
            transition(&Stage::JoiningFinalStage, StageOutcome::Arrived, &mut budget, &timings())
                .unwrap(),
            Transition::Done
        );
    }

    #[test]
    fn test_budget_shared_across_stages() {
        let mut budget = RetryBudget::fatal_at("teleport", 2);
        transition(
            &Stage::JoiningTarget,
            StageOutcome::Rejected("Error".to_string()),
            &mut budget,
            &timings(),
        )
        .unwrap();
        let err = transition(
            &Stage::JoiningFinalStage,
            StageOutcome::NotArrived,
            &mut budget,
            &timings(),
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_success_short_circuits_wait() {
        let session = Arc::new(MockSession::new());
        session.on(
            ISLAND_COMMAND,
            vec![SessionEvent::chat("You are already there!")],
        );
        let config = AppConfig::default();
        let probe = Arc::new(LocationProbe::new(session.clone(), &config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe, &config);
        let mut budget = RetryBudget::fatal_at("teleport", 10);

        orchestrator
            .run(Stage::JoiningFinalStage, Duration::ZERO, &mut budget)
            .await
            .unwrap();
        assert_eq!(session.count(LOCATION_QUERY), 0);
        assert_eq!(budget.used(), 0);
        assert_eq!(session.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visit_mode_clicks_teleport_item() {
        let session = Arc::new(MockSession::new());
        session.on(
            "/visit",
            vec![
                SessionEvent::WindowOpen(crate::session::Window {
                    id: 2,
                    title: "Visit".to_string(),
                    slots: vec![crate::session::WindowSlot {
                        slot: 13,
                        name: "skull".to_string(),
                    }],
                }),
                SessionEvent::ForcedMove,
            ],
        );
        session.on(
            LOCATION_QUERY,
            vec![SessionEvent::chat(r#""map":"Private Island"}"#)],
        );
        let mut config = AppConfig::default();
        config.visit.enabled = true;
        config.visit.username = "Steve".to_string();
        let probe = Arc::new(LocationProbe::new(session.clone(), &config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe, &config);
        let mut budget = RetryBudget::fatal_at("teleport", 10);

        orchestrator
            .run(Stage::JoiningFinalStage, Duration::ZERO, &mut budget)
            .await
            .unwrap();
        assert_eq!(
            session.commands(),
            vec!["/visit Steve".to_string(), LOCATION_QUERY.to_string()]
        );
        assert_eq!(session.clicks(), vec![(2, 13)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warp_failure_rejects_join_target() {
        let session = Arc::new(MockSession::new());
        session
            .on(
                JOIN_TARGET_COMMAND,
                vec![SessionEvent::chat(
                    "Couldn't warp you! Try again later. (ALREADY_IN_ISLAND_TYPE)",
                )],
            )
            .on(
                JOIN_TARGET_COMMAND,
                vec![SessionEvent::chat("Welcome to Hypixel SkyBlock!")],
            );
        session.on(LOBBY_COMMAND, vec![SessionEvent::Spawn]);
        session.on(ISLAND_COMMAND, vec![SessionEvent::ForcedMove]);
        session.on(
            LOCATION_QUERY,
            vec![SessionEvent::chat(r#""map":"Private Island"}"#)],
        );
        let config = AppConfig::default();
        let probe = Arc::new(LocationProbe::new(session.clone(), &config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe, &config);
        let mut budget = RetryBudget::fatal_at("teleport", 10);

        orchestrator.recover(&mut budget).await.unwrap();
        assert_eq!(budget.used(), 1);
        assert_eq!(session.count(LOBBY_COMMAND), 1);
        assert_eq!(session.count(JOIN_TARGET_COMMAND), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_there_still_succeeds_final_stage() {
        let session = Arc::new(MockSession::new());
        session.on(
            ISLAND_COMMAND,
            vec![SessionEvent::chat(
                "Couldn't warp you! Try again later. (ALREADY_IN_ISLAND_TYPE)",
            )],
        );
        let config = AppConfig::default();
        let probe = Arc::new(LocationProbe::new(session.clone(), &config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe, &config);
        let mut budget = RetryBudget::fatal_at("teleport", 10);

        orchestrator
            .run(Stage::JoiningFinalStage, Duration::ZERO, &mut budget)
            .await
            .unwrap();
        assert_eq!(budget.used(), 0);
    }
}
