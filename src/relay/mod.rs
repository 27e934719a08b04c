//! 消息中继：把格式化后的日志行排队，由 Webhook 定期批量发送

pub mod webhook;

use std::sync::{Arc, Mutex};

pub use webhook::{is_valid_webhook_url, WebhookRelay};

/// 待发送队列（可克隆，共享同一队列）
#[derive(Debug, Clone, Default)]
pub struct RelayQueue {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }

    /// 取出全部待发送行
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
