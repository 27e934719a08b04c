//! 终止处理
//!
//! 所有致命情况共用一条路径：记录原因、flush 待发送的转发消息、持久化日志，然后以状态码 0 退出。
//! Ctrl+C / SIGTERM 通过 CancellationToken 通知会话监管停止。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::LoggingSection;
use crate::observability::LogBook;
use crate::relay::WebhookRelay;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 致命错误
    Fatal(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 获取关闭 token（用于取消正在进行的任务）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, shutting down");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    /// 注册清理任务
    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 注册调用方仍持有引用的清理任务（注册后还需调整其参数时使用）
    pub fn register_shared(&mut self, task: Arc<dyn ShutdownCleanup>) {
        self.cleanup_tasks.push(task);
    }

    /// 执行所有清理任务
    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }
    }

    /// 获取关闭管理器
    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 统一终止路径：记录原因、执行清理、以状态码 0 退出
pub async fn terminate(coordinator: &ShutdownCoordinator, reason: ShutdownReason) {
    match &reason {
        ShutdownReason::Fatal(msg) => tracing::error!("Stopping: {}", msg),
        other => tracing::info!("Stopping: {:?}", other),
    }
    coordinator.manager().shutdown(reason);
    coordinator.run_cleanup().await;
    std::process::exit(0);
}

/// 发送队列中剩余的转发消息
pub struct RelayFlushCleanup {
    relay: Arc<WebhookRelay>,
}

impl RelayFlushCleanup {
    pub fn new(relay: Arc<WebhookRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RelayFlushCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.relay.flush().await
    }

    fn name(&self) -> &'static str {
        "RelayFlush"
    }
}

/// 将累计的日志写入 logs 目录
///
/// 配置加载前即注册（使用默认目录），保证配置缺失或解析失败时的退出也会落盘；
/// 配置加载后通过 `configure` 切换到配置中的目录。
pub struct LogPersistCleanup {
    book: LogBook,
    target: Mutex<(PathBuf, usize)>,
}

impl LogPersistCleanup {
    pub fn new(book: LogBook, logging: &LoggingSection) -> Self {
        Self {
            book,
            target: Mutex::new((logging.logs_dir.clone(), logging.max_log_files)),
        }
    }

    pub fn configure(&self, logging: &LoggingSection) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) =
            (logging.logs_dir.clone(), logging.max_log_files);
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for LogPersistCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let (dir, max_files) = self
            .target
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let path = self.book.persist(&dir, max_files)?;
        tracing::info!("Logs saved to {}", path.display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogPersist"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert!(manager.token().is_cancelled());
    }

    #[test]
    fn test_shutdown_reason_is_broadcast() {
        let manager = ShutdownManager::new();
        let mut reasons = manager.subscribe();
        manager.shutdown(ShutdownReason::Fatal("budget".to_string()));
        assert_eq!(
            reasons.try_recv().unwrap(),
            ShutdownReason::Fatal("budget".to_string())
        );
    }

    #[tokio::test]
    async fn test_log_persist_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let book = LogBook::new();
        book.record("LOG", "Arrived at Island");

        let logging = LoggingSection {
            log_chat: true,
            logs_dir: dir.path().join("logs"),
            max_log_files: 10,
        };
        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new(manager);
        coordinator.register(LogPersistCleanup::new(book, &logging));
        coordinator.run_cleanup().await;

        let files: Vec<_> = std::fs::read_dir(dir.path().join("logs")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_log_persist_follows_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let book = LogBook::new();
        book.record("LOG", "Starting CoffeeL");

        let early = LoggingSection {
            log_chat: true,
            logs_dir: dir.path().join("default-logs"),
            max_log_files: 10,
        };
        let configured = LoggingSection {
            logs_dir: dir.path().join("configured-logs"),
            ..early.clone()
        };

        let persist = Arc::new(LogPersistCleanup::new(book, &early));
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register_shared(persist.clone());
        persist.configure(&configured);
        coordinator.run_cleanup().await;

        assert!(!dir.path().join("default-logs").exists());
        assert_eq!(
            std::fs::read_dir(dir.path().join("configured-logs"))
                .unwrap()
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cleanup_before_config_uses_initial_dir() {
        let dir = tempfile::tempdir().unwrap();
        let book = LogBook::new();
        book.record("ERROR", "config missing");

        let early = LoggingSection {
            log_chat: true,
            logs_dir: dir.path().join("logs"),
            max_log_files: 10,
        };
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register_shared(Arc::new(LogPersistCleanup::new(book, &early)));
        coordinator.run_cleanup().await;

        let written: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("config missing"));
    }
}
