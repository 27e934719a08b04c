//! 可观测性：tracing 初始化与日志簿

pub mod log_book;

pub use log_book::{LogBook, LogBookLayer, RelayRoute, CHAT_TARGET};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：默认 info，可通过 RUST_LOG 覆盖；所有事件同时写入日志簿
pub fn init(book: &LogBook) {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with(fmt::layer())
        .with(book.layer())
        .init();
}
