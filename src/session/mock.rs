//! 脚本化会话（用于测试与本地演练，无需真实服务器）
//!
//! 记录每条发出的命令及其时间；按命令前缀回放预设的事件批次。
//! 同一前缀多次 `on` 会依次排队，每次命令消费一批，最后一批重复使用。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{Session, SessionError, SessionEvent};

/// 一条已发出的命令
#[derive(Debug, Clone)]
pub struct IssuedCommand {
    pub text: String,
    pub at: Instant,
}

struct Script {
    prefix: String,
    replies: VecDeque<Vec<SessionEvent>>,
}

#[derive(Default)]
struct MockState {
    issued: Vec<IssuedCommand>,
    clicks: Vec<(u8, u16)>,
    scripts: Vec<Script>,
}

/// Mock 会话
pub struct MockSession {
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<MockState>,
}

impl MockSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            state: Mutex::new(MockState::default()),
        }
    }

    /// 为以 `prefix` 开头的命令追加一批回复
    pub fn on(&self, prefix: &str, replies: Vec<SessionEvent>) -> &Self {
        let mut state = self.lock();
        match state.scripts.iter_mut().find(|s| s.prefix == prefix) {
            Some(script) => script.replies.push_back(replies),
            None => state.scripts.push(Script {
                prefix: prefix.to_string(),
                replies: VecDeque::from([replies]),
            }),
        }
        self
    }

    /// 主动推送一个事件（模拟服务器的非请求消息）
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.lock().issued.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().issued.iter().map(|c| c.text.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.lock()
            .issued
            .iter()
            .filter(|c| c.text == command)
            .count()
    }

    pub fn clicks(&self) -> Vec<(u8, u16)> {
        self.lock().clicks.clone()
    }

    /// 当前挂载的监听数量
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for MockSession {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn chat(&self, text: &str) -> Result<(), SessionError> {
        let replies = {
            let mut state = self.lock();
            state.issued.push(IssuedCommand {
                text: text.to_string(),
                at: Instant::now(),
            });
            state
                .scripts
                .iter_mut()
                .find(|s| text.starts_with(&s.prefix))
                .and_then(|s| {
                    if s.replies.len() > 1 {
                        s.replies.pop_front()
                    } else {
                        s.replies.front().cloned()
                    }
                })
                .unwrap_or_default()
        };
        for event in replies {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    async fn click_slot(&self, window_id: u8, slot: u16) -> Result<(), SessionError> {
        self.lock().clicks.push((window_id, slot));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_consume_then_repeat() {
        let mock = MockSession::new();
        mock.on("/locraw", vec![SessionEvent::chat("first")])
            .on("/locraw", vec![SessionEvent::chat("second")]);
        let mut rx = mock.subscribe();

        for _ in 0..3 {
            mock.chat("/locraw").await.unwrap();
        }
        assert_eq!(rx.recv().await.unwrap().text(), Some("first"));
        assert_eq!(rx.recv().await.unwrap().text(), Some("second"));
        assert_eq!(rx.recv().await.unwrap().text(), Some("second"));
        assert_eq!(mock.count("/locraw"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_command_is_recorded() {
        let mock = MockSession::new();
        mock.chat("/p accept Someone").await.unwrap();
        assert_eq!(mock.commands(), vec!["/p accept Someone".to_string()]);
    }
}
