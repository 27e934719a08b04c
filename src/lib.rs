//! CoffeeL - 聊天驱动的会话守护
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 聊天分类、重试预算、定位探测、恢复状态机、在岛巡检、会话监管、终止路径
//! - **observability**: tracing 初始化与日志簿（落盘 / 转发）
//! - **relay**: 日志转发队列与 Discord Webhook
//! - **session**: 会话边界（事件模型、TCP 桥接、Mock）

pub mod config;
pub mod core;
pub mod observability;
pub mod relay;
pub mod session;
