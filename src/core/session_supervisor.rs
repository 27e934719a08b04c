//! 会话监管：生命周期、被踢重连
//!
//! 每个会话持有一个子 CancellationToken：出生后启动聊天处理、恢复编排与在岛巡检；
//! 被踢、断开或客户端超时即取消该 token，按被踢预算决定是否在延迟后重连。
//! 传送预算由监管者持有，跨重连累计。

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ms, AppConfig};
use crate::core::budget::RetryBudget;
use crate::core::chat_handler::ChatHandler;
use crate::core::monitor::PresenceMonitor;
use crate::core::orchestrator::RecoveryOrchestrator;
use crate::core::probe::LocationProbe;
use crate::core::wait::Listener;
use crate::core::CoffeeError;
use crate::session::{Session, SessionError, SessionEvent};

/// 需要重启会话的底层错误片段
pub const RESTART_ERRORS: &[&str] = &["client timed out"];

/// 会话级生命周期管理
pub struct SessionSupervisor {
    config: AppConfig,
    teleport_budget: RetryBudget,
    kick_budget: RetryBudget,
    /// 进程关闭时触发
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(config: AppConfig, cancel_token: CancellationToken) -> Self {
        Self {
            teleport_budget: RetryBudget::fatal_at("teleport", config.retries.teleport),
            kick_budget: RetryBudget::allowing("kick", config.retries.kicks),
            config,
            cancel_token,
        }
    }

    pub fn teleport_budget(&self) -> &RetryBudget {
        &self.teleport_budget
    }

    pub fn kick_budget(&self) -> &RetryBudget {
        &self.kick_budget
    }

    /// 连接并监管会话，直到进程关闭（Ok）或出现致命错误（Err）
    pub async fn run<C, Fut>(&mut self, connect: C) -> Result<(), CoffeeError>
    where
        C: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Session>, SessionError>>,
    {
        let shutdown = self.cancel_token.clone();
        loop {
            let session = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                connected = connect() => connected,
            };
            let reason = match session {
                Ok(session) => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    ended = self.drive(session) => ended?,
                },
                Err(e) => format!("connection failed: {}", e),
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                restarted = self.restart(&reason) => restarted?,
            }
        }
    }

    /// 驱动单个会话；返回会话结束原因，致命错误以 Err 返回
    pub async fn drive(&mut self, session: Arc<dyn Session>) -> Result<String, CoffeeError> {
        let mut lifecycle = Listener::attach_lifecycle(session.as_ref());

        let spawn_timeout = self.config.timings.spawn_timeout_ms;
        let spawned = lifecycle
            .wait_for(ms(spawn_timeout), |event| match event {
                SessionEvent::Spawn => Some(Ok(())),
                other => end_reason(other).map(Err),
            })
            .await;
        match spawned {
            Ok(Some(Ok(()))) => tracing::info!("Bot spawned, teleporting to SkyBlock"),
            Ok(Some(Err(reason))) => return Ok(reason),
            Ok(None) => return Ok(format!("No spawn within {}ms", spawn_timeout)),
            Err(e) => return Ok(e.to_string()),
        }

        let session_token = self.cancel_token.child_token();
        let chat_listener = Listener::attach(session.as_ref(), "chat");
        let chat_handler = ChatHandler::new(session.clone(), &self.config);
        let chat_token = session_token.clone();
        let chat_task = tokio::spawn(async move {
            tokio::select! {
                _ = chat_token.cancelled() => {}
                result = chat_handler.run(chat_listener) => {
                    if let Err(e) = result {
                        tracing::debug!("Chat handler stopped: {}", e);
                    }
                }
            }
        });

        let probe = Arc::new(LocationProbe::new(session.clone(), &self.config));
        let orchestrator = RecoveryOrchestrator::new(session.clone(), probe.clone(), &self.config);
        let monitor = PresenceMonitor::new(probe, &self.config.timings);

        let result = tokio::select! {
            ended = lifecycle.next_match(end_reason) => {
                Ok(ended.unwrap_or_else(|e| e.to_string()))
            }
            located = keep_at_target(&orchestrator, &monitor, &mut self.teleport_budget) => {
                match located {
                    Ok(()) => Ok("presence monitor stopped".to_string()),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => Ok(e.to_string()),
                }
            }
        };

        session_token.cancel();
        let _ = chat_task.await;
        result
    }

    async fn restart(&mut self, reason: &str) -> Result<(), CoffeeError> {
        for line in reason.lines() {
            tracing::error!("{}", line);
        }

        let attempt = self.kick_budget.charge().inspect_err(|_| {
            tracing::error!("Too many kicks, stopping");
        })?;

        let delay = ms(self.config.timings.kick_restart_ms);
        tracing::warn!(
            "Kicked, restarting bot in {} seconds (retry number {}/{})",
            delay.as_secs(),
            attempt,
            self.kick_budget.limit()
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// 首次恢复后进入无限巡检
async fn keep_at_target(
    orchestrator: &RecoveryOrchestrator,
    monitor: &PresenceMonitor,
    budget: &mut RetryBudget,
) -> Result<(), CoffeeError> {
    orchestrator.recover(budget).await?;
    monitor.run(orchestrator, budget).await
}

/// 会话是否因该事件结束；返回结束原因
fn end_reason(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Kicked { reason } => Some(format!("Kicked: {}", reason)),
        SessionEvent::End { reason } => Some(format!("Disconnected: {}", reason)),
        SessionEvent::Error { message } => {
            tracing::error!("{}", message);
            RESTART_ERRORS
                .iter()
                .any(|e| message.contains(e))
                .then(|| message.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;

    #[test]
    fn test_end_reason() {
        assert!(end_reason(&SessionEvent::Kicked {
            reason: "You logged in from another location".to_string()
        })
        .is_some());
        assert!(end_reason(&SessionEvent::Error {
            message: "client timed out after 30000 milliseconds".to_string()
        })
        .is_some());
        assert!(end_reason(&SessionEvent::Error {
            message: "unknown packet".to_string()
        })
        .is_none());
        assert!(end_reason(&SessionEvent::Spawn).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_before_spawn_ends_session() {
        let session = Arc::new(MockSession::new());
        let mut supervisor = SessionSupervisor::new(AppConfig::default(), CancellationToken::new());

        let emitter = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            emitter.emit(SessionEvent::Kicked {
                reason: "Connection lost".to_string(),
            });
        });

        let reason = supervisor.drive(session).await.unwrap();
        assert!(reason.contains("Connection lost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_spawn_ends_session() {
        let session = Arc::new(MockSession::new());
        let mut supervisor = SessionSupervisor::new(AppConfig::default(), CancellationToken::new());
        let start = tokio::time::Instant::now();

        let reason = supervisor.drive(session.clone()).await.unwrap();
        assert!(reason.contains("No spawn"));
        assert!(start.elapsed() >= std::time::Duration::from_millis(60_000));
        assert!(session.commands().is_empty());
        assert_eq!(session.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_bridge_events_before_drive_are_observed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"{\"type\":\"spawn\"}\n{\"type\":\"kicked\",\"reason\":\"Connection reset\"}\n")
                .await
                .unwrap();
            let mut buf = [0u8; 1024];
            while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let session = crate::session::BridgeSession::connect(&addr).await.unwrap();
        // 出生与踢出都在 drive 挂载任何监听之前到达
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut supervisor = SessionSupervisor::new(AppConfig::default(), CancellationToken::new());
        let reason = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            supervisor.drive(session),
        )
        .await
        .expect("drive should end on the buffered kick")
        .unwrap();
        assert!(reason.contains("Connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_kick_is_fatal() {
        let mut supervisor = SessionSupervisor::new(AppConfig::default(), CancellationToken::new());
        let connects = std::sync::atomic::AtomicUsize::new(0);

        let err = supervisor
            .run(|| {
                connects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err::<Arc<dyn Session>, _>(SessionError::Closed) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoffeeError::RetryBudgetExhausted { budget: "kick", .. }
        ));
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 6);
        assert_eq!(supervisor.kick_budget().used(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_run() {
        let token = CancellationToken::new();
        let mut supervisor = SessionSupervisor::new(AppConfig::default(), token.clone());
        token.cancel();

        let result = supervisor
            .run(|| async { Err::<Arc<dyn Session>, _>(SessionError::Closed) })
            .await;
        assert!(result.is_ok());
        assert_eq!(supervisor.kick_budget().used(), 0);
    }
}
