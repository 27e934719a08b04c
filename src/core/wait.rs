//! 单次等待原语
//!
//! 一个 `Listener` 即一次订阅：创建时挂载，Drop 时卸载（作用域获取）。
//! `wait_for` 把「匹配事件」与「截止时间」两个来源汇入同一个结算点，先到者胜，另一方随 future 一起被丢弃，
//! 因此不存在结算后再次触发的定时器。

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::session::{Session, SessionError, SessionEvent};

/// 作用域内的事件监听
pub struct Listener {
    label: &'static str,
    rx: broadcast::Receiver<SessionEvent>,
}

impl Listener {
    /// 在会话上挂载监听；必须在发出会触发回复的命令之前调用
    pub fn attach(session: &dyn Session, label: &'static str) -> Self {
        tracing::trace!("Listener '{}' attached", label);
        Self {
            label,
            rx: session.subscribe(),
        }
    }

    /// 挂载会话生命周期监听（出生、踢出、断开），可取到会话建立时就已缓冲的事件
    pub fn attach_lifecycle(session: &dyn Session) -> Self {
        tracing::trace!("Listener 'lifecycle' attached");
        Self {
            label: "lifecycle",
            rx: session.lifecycle(),
        }
    }

    /// 等待第一个被 `matcher` 接受的事件，无截止时间
    pub async fn next_match<T, F>(&mut self, mut matcher: F) -> Result<T, SessionError>
    where
        F: FnMut(&SessionEvent) -> Option<T>,
    {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(value) = matcher(&event) {
                        return Ok(value);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Listener '{}' lagged, skipped {} events", self.label, skipped);
                }
                Err(RecvError::Closed) => return Err(SessionError::Closed),
            }
        }
    }

    /// 在 `within` 内等待匹配事件；超时返回 `Ok(None)`
    pub async fn wait_for<T, F>(
        &mut self,
        within: Duration,
        matcher: F,
    ) -> Result<Option<T>, SessionError>
    where
        F: FnMut(&SessionEvent) -> Option<T>,
    {
        match tokio::time::timeout(within, self.next_match(matcher)).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                tracing::debug!("Listener '{}' timed out after {:?}", self.label, within);
                Ok(None)
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        tracing::trace!("Listener '{}' detached", self.label);
    }
}
