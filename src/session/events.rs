//! 会话事件：由桥接进程以 JSON 行推送，编排层据此驱动状态机

use serde::{Deserialize, Serialize};

/// 聊天行在客户端中的显示位置；`game_info` 为动作栏信息，不参与聊天记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatPosition {
    #[default]
    Chat,
    System,
    GameInfo,
}

/// 会话事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// 服务器下发的一行纯文本
    Message {
        text: String,
        #[serde(default)]
        position: ChatPosition,
    },
    /// 出生（含换服后的重新出生）
    Spawn,
    /// 服务器主动重定位了客户端
    ForcedMove,
    /// 打开了一个窗口（容器界面）
    WindowOpen(Window),
    Kicked {
        reason: String,
    },
    Error {
        message: String,
    },
    /// 连接已结束
    End {
        reason: String,
    },
}

impl SessionEvent {
    /// 便捷构造：普通聊天位置的一行文本
    pub fn chat(text: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            position: ChatPosition::Chat,
        }
    }

    /// 若为聊天行，返回其文本（不区分位置）
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// 窗口快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub id: u8,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slots: Vec<WindowSlot>,
}

/// 窗口中一个非空槽位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSlot {
    pub slot: u16,
    pub name: String,
}

impl Window {
    /// 第一个物品名为 `name` 的槽位
    pub fn find_item(&self, name: &str) -> Option<&WindowSlot> {
        self.slots.iter().find(|s| s.name == name)
    }
}
