//! Discord Webhook 转发
//!
//! 每隔固定间隔把队列中的行拼成代码块发送；单条消息受 Discord 2000 字符限制，超出则拆分。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tokio::task::JoinHandle;

use super::RelayQueue;

const WEBHOOK_USERNAME: &str = "CoffeeL Webhook";
const WEBHOOK_AVATAR: &str = "https://i.imgur.com/EJZ1jF5.png";
/// 代码块包装后仍需低于 2000
const MAX_CONTENT_CHARS: usize = 1900;

fn webhook_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(?:[a-z]+\.)?discord(?:app)?\.com/api/webhooks/[^/]+/[^/]+$")
            .expect("valid webhook regex")
    })
}

pub fn is_valid_webhook_url(url: &str) -> bool {
    webhook_regex().is_match(url)
}

/// Webhook 转发器
pub struct WebhookRelay {
    url: String,
    queue: RelayQueue,
    client: reqwest::Client,
}

impl WebhookRelay {
    /// url 为空时返回 None；url 非法时记录错误并返回 None
    pub fn new(url: &str, queue: RelayQueue) -> Option<Self> {
        if url.is_empty() {
            return None;
        }
        if !is_valid_webhook_url(url) {
            tracing::error!("Invalid webhook URL");
            return None;
        }
        Some(Self {
            url: url.to_string(),
            queue,
            client: reqwest::Client::new(),
        })
    }

    /// 启动定期发送任务
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.flush().await {
                    // 使用独立 target，日志簿不收集，避免失败信息再次进入队列
                    tracing::warn!(target: "relay", "Failed to send webhook message: {}", e);
                }
            }
        })
    }

    /// 立即发送队列中的全部内容
    pub async fn flush(&self) -> anyhow::Result<()> {
        let lines = self.queue.drain();
        for content in batch(&lines, MAX_CONTENT_CHARS) {
            let payload = json!({
                "username": WEBHOOK_USERNAME,
                "avatar_url": WEBHOOK_AVATAR,
                "content": content,
            });
            self.client
                .post(&self.url)
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }
}

/// 把行拼成若干个不超过 `max_chars` 的代码块；过长的单行会被截断
pub fn batch(lines: &[String], max_chars: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line: String = line.chars().take(max_chars).collect();
        if !current.is_empty() && current.chars().count() + line.chars().count() + 1 > max_chars {
            blocks.push(format!("```\n{}\n```", current));
            current.clear();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        blocks.push(format!("```\n{}\n```", current));
    }
    blocks
}
