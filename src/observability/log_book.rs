//! 日志簿
//!
//! 作为 tracing Layer 收集本 crate 的日志与聊天行：累计为文本供退出时落盘，并按配置转发到消息中继。
//! 落盘时日志目录最多保留 `max_files` 个文件，超出则删除最旧的。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Local};
use regex::Regex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::relay::RelayQueue;

/// 聊天行使用的 tracing target
pub const CHAT_TARGET: &str = "chat";

const CRATE_TARGET: &str = "coffeel";

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ansi regex"))
}

/// 转发规则：ERROR 总是转发，CHAT 受 `log_chat` 控制，其余受 `log_console` 控制
#[derive(Debug, Clone)]
pub struct RelayRoute {
    pub queue: RelayQueue,
    pub log_console: bool,
    pub log_chat: bool,
}

impl RelayRoute {
    fn accepts(&self, tag: &str) -> bool {
        match tag {
            "ERROR" => true,
            "CHAT" => self.log_chat,
            _ => self.log_console,
        }
    }
}

struct Inner {
    started: DateTime<Local>,
    text: Mutex<String>,
    route: OnceLock<RelayRoute>,
}

/// 日志簿（可克隆，共享同一份内容）
#[derive(Clone)]
pub struct LogBook {
    inner: Arc<Inner>,
}

impl LogBook {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                started: Local::now(),
                text: Mutex::new(String::new()),
                route: OnceLock::new(),
            }),
        }
    }

    /// 设置转发目标；只生效一次
    pub fn route_to(&self, route: RelayRoute) {
        if self.inner.route.set(route).is_err() {
            tracing::warn!("Log relay route already set");
        }
    }

    /// 记录一行
    pub fn record(&self, tag: &str, message: &str) {
        let clean = ansi_regex().replace_all(message, "");
        let line = format!(
            "[{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            tag,
            clean
        );
        {
            let mut text = self.inner.text.lock().unwrap_or_else(|e| e.into_inner());
            text.push_str(&line);
            text.push('\n');
        }
        if let Some(route) = self.inner.route.get() {
            if route.accepts(tag) {
                route.queue.push(format!("[{}] {}", tag, clean));
            }
        }
    }

    /// 当前累计的全部文本
    pub fn text(&self) -> String {
        self.inner
            .text
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 本次运行的日志文件名
    pub fn file_name(&self) -> String {
        self.inner
            .started
            .format("date%Y-%m-%dtime%H-%M-%S.log")
            .to_string()
    }

    /// 写入 `dir/<file_name>`，并把目录中的文件数控制在 `max_files` 以内
    pub fn persist(&self, dir: &Path, max_files: usize) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());

        let mut existing: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path(), modified))
            })
            .collect();
        existing.sort_by_key(|(_, modified)| *modified);

        let keep = max_files.saturating_sub(1);
        if existing.len() > keep {
            let excess = existing.len() - keep;
            for (old, _) in existing.into_iter().take(excess) {
                std::fs::remove_file(old)?;
            }
        }

        std::fs::write(&path, self.text())?;
        Ok(path)
    }

    /// 供 tracing_subscriber 注册的 Layer
    pub fn layer(&self) -> LogBookLayer {
        LogBookLayer { book: self.clone() }
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new()
    }
}

/// 把事件写入日志簿的 Layer
pub struct LogBookLayer {
    book: LogBook,
}

impl<S: Subscriber> Layer<S> for LogBookLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let target = meta.target();
        if target != CHAT_TARGET && !target.starts_with(CRATE_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let tag = if target == CHAT_TARGET {
            "CHAT"
        } else {
            match *meta.level() {
                Level::ERROR => "ERROR",
                Level::WARN => "WARN",
                _ => "LOG",
            }
        };
        self.book.record(tag, &visitor.message);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}
