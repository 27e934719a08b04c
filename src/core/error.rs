//! 错误类型
//!
//! 与会话监管配合：`is_fatal()` 为真时走统一的终止路径，否则视为会话级故障并触发重连。

use thiserror::Error;

use crate::session::SessionError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum CoffeeError {
    /// 重试预算耗尽（传送阶段或被踢次数）
    #[error("Retry budget '{budget}' exhausted ({attempts}/{limit})")]
    RetryBudgetExhausted {
        budget: &'static str,
        attempts: u32,
        limit: u32,
    },

    /// 访问他人岛屿时窗口中找不到传送物品
    #[error("Could not find the teleport item in window '{window}'")]
    MissingInteractionTarget { window: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoffeeError {
    /// 是否为致命错误（需终止进程）
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoffeeError::Session(_))
    }
}
