//! 聊天处理：记录聊天行、自动接受组队邀请
//!
//! 与编排无关，在整个会话期间独立运行。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::classifier::{classify, is_ignored, ClassifiedEvent};
use crate::core::wait::Listener;
use crate::session::{ChatPosition, Session, SessionError, SessionEvent};

pub struct ChatHandler {
    session: Arc<dyn Session>,
    log_chat: bool,
    accept_party: bool,
}

impl ChatHandler {
    pub fn new(session: Arc<dyn Session>, config: &AppConfig) -> Self {
        Self {
            session,
            log_chat: config.logging.log_chat,
            accept_party: config.accept_party.enabled,
        }
    }

    /// 持续消费聊天行，直到会话关闭
    pub async fn run(self, mut listener: Listener) -> Result<(), SessionError> {
        loop {
            let (text, position) = listener
                .next_match(|event| match event {
                    SessionEvent::Message { text, position } => Some((text.clone(), *position)),
                    _ => None,
                })
                .await?;
            if let Some(command) = self.handle(&text, position) {
                self.session.chat(&command).await?;
            }
        }
    }

    /// 处理一行，返回需要发出的命令
    pub fn handle(&self, text: &str, position: ChatPosition) -> Option<String> {
        if position == ChatPosition::GameInfo || is_ignored(text) {
            return None;
        }
        if self.log_chat {
            tracing::info!(target: "chat", "{}", text);
        }
        if !self.accept_party {
            return None;
        }
        match classify(text) {
            ClassifiedEvent::PartyInvite(leader) => {
                tracing::info!("Accepting party invite from {}", leader);
                Some(format!("/p accept {}", leader))
            }
            _ => None,
        }
    }
}
