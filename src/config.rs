//! 应用配置：从 config/coffeel.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COFFEEL__*` 覆盖（双下划线表示嵌套，如 `COFFEEL__VISIT__USERNAME=Steve`）。
//! 除「文件存在、类型正确」外不做额外校验。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 默认配置文件位置（不含扩展名）
pub const DEFAULT_CONFIG_NAMES: [&str; 3] = ["config/coffeel", "../config/coffeel", "coffeel"];

/// 应用配置根
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSection,
    pub visit: VisitSection,
    pub accept_party: AcceptPartySection,
    pub logging: LoggingSection,
    pub webhook: WebhookSection,
    pub location: LocationSection,
    pub timings: TimingsSection,
    pub retries: RetriesSection,
}

/// [session] 段：桥接进程地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,
}

fn default_bridge_addr() -> String {
    "127.0.0.1:25580".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            bridge_addr: default_bridge_addr(),
        }
    }
}

/// [visit] 段：启用后通过 `/visit <username>` 进入他人岛屿，否则 `/is`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
}

/// 进入目标岛屿的方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMode {
    Direct,
    Visit { peer: String },
}

impl VisitSection {
    pub fn join_mode(&self) -> JoinMode {
        if self.enabled && !self.username.is_empty() {
            JoinMode::Visit {
                peer: self.username.clone(),
            }
        } else {
            JoinMode::Direct
        }
    }
}

/// [accept_party] 段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptPartySection {
    #[serde(default)]
    pub enabled: bool,
}

/// [logging] 段：聊天记录开关与日志目录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_true")]
    pub log_chat: bool,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// 日志目录中保留的最多文件数
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

fn default_true() -> bool {
    true
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_log_files() -> usize {
    10
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_chat: true,
            logs_dir: default_logs_dir(),
            max_log_files: default_max_log_files(),
        }
    }
}

/// [webhook] 段：Discord Webhook 转发；url 为空即禁用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSection {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_true")]
    pub log_console: bool,
    #[serde(default = "default_true")]
    pub log_chat: bool,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            log_console: true,
            log_chat: true,
        }
    }
}

/// [location] 段：`/locraw` 报告中代表目标的地图名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSection {
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_target() -> String {
    "Private Island".to_string()
}

impl Default for LocationSection {
    fn default() -> Self {
        Self {
            target: default_target(),
        }
    }
}

/// [timings] 段（毫秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsSection {
    /// 发命令前的缓冲
    pub grace_ms: u64,
    /// 定位探测超时
    pub probe_timeout_ms: u64,
    /// 强制位移后到发出 `/locraw` 的间隔
    pub forced_move_settle_ms: u64,
    /// 到达大厅后的稳定等待
    pub settle_ms: u64,
    /// 进入 SkyBlock 后到前往岛屿的间隔
    pub hub_to_island_ms: u64,
    /// 阶段失败后的重试间隔
    pub stage_retry_ms: u64,
    pub monitor_interval_ms: u64,
    /// 巡检发现不在岛上后，开始恢复前的等待
    pub monitor_recovery_ms: u64,
    /// 巡检恢复流程中各步骤的间隔
    pub monitor_step_ms: u64,
    /// 被踢后重连前的等待
    pub kick_restart_ms: u64,
    /// 访问窗口打开的超时
    pub window_timeout_ms: u64,
    /// `/play sb` 无任何回应时按失败处理
    pub join_timeout_ms: u64,
    /// 连接后等待出生的上限，超时按会话结束处理并重连
    pub spawn_timeout_ms: u64,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            grace_ms: 500,
            probe_timeout_ms: 5_000,
            forced_move_settle_ms: 500,
            settle_ms: 1_000,
            hub_to_island_ms: 5_000,
            stage_retry_ms: 20_000,
            monitor_interval_ms: 60_000,
            monitor_recovery_ms: 10_000,
            monitor_step_ms: 5_000,
            kick_restart_ms: 5_000,
            window_timeout_ms: 10_000,
            join_timeout_ms: 30_000,
            spawn_timeout_ms: 60_000,
        }
    }
}

/// 毫秒转 Duration
pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// [retries] 段：传送阶段失败上限（达到即终止）与被踢重连次数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetriesSection {
    #[serde(default = "default_teleport_retries")]
    pub teleport: u32,
    #[serde(default = "default_kick_retries")]
    pub kicks: u32,
}

fn default_teleport_retries() -> u32 {
    10
}

fn default_kick_retries() -> u32 {
    5
}

impl Default for RetriesSection {
    fn default() -> Self {
        Self {
            teleport: default_teleport_retries(),
            kicks: default_kick_retries(),
        }
    }
}

/// 查找已存在的默认配置文件
pub fn find_config_file() -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| PathBuf::from(format!("{}.toml", name)))
        .find(|path| path.exists())
}

/// 若配置文件不存在则写入一份默认配置；返回是否原本已存在
pub fn ensure_config_file(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&AppConfig::default())?)?;
    Ok(false)
}

/// 从 config 目录加载配置，环境变量 COFFEEL__* 可覆盖
///
/// 1. 按顺序查找 config/coffeel.toml、../config/coffeel.toml、coffeel.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COFFEEL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = find_config_file() {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COFFEEL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
