//! 会话边界：与外部游戏协议客户端之间的唯一接口
//!
//! - **events**: 会话事件模型（聊天行、出生、强制位移、窗口、踢出）
//! - **bridge**: JSON 行协议的 TCP 桥接实现（真实连接）
//! - **mock**: 脚本化会话（测试与本地演练）
//!
//! 编排层只通过 `Session` trait 订阅事件、发送命令；订阅即 `broadcast::Receiver`，丢弃即退订。

pub mod bridge;
pub mod events;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub use bridge::BridgeSession;
pub use events::{ChatPosition, SessionEvent, Window, WindowSlot};
pub use mock::{IssuedCommand, MockSession};

/// 会话层错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,

    #[error("Failed to connect: {0}")]
    Connect(#[from] std::io::Error),
}

/// 活动会话句柄：进程独占，编排层只挂载/卸载监听，不负责关闭
#[async_trait]
pub trait Session: Send + Sync {
    /// 订阅事件流；返回的 Receiver 被丢弃即视为监听卸载
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// 生命周期监听使用的 Receiver。
    /// 连接建立即开始推送事件的实现应返回在推送开始前就已订阅的 Receiver（仅第一次），
    /// 否则出生、踢出等早到事件会丢失。
    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.subscribe()
    }

    /// 发送一行聊天/命令（如 `/locraw`）
    async fn chat(&self, text: &str) -> Result<(), SessionError>;

    /// 点击窗口中的某个槽位（访问他人岛屿时的传送物品）
    async fn click_slot(&self, window_id: u8, slot: u16) -> Result<(), SessionError>;
}
