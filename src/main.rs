//! CoffeeL
//!
//! 入口：初始化日志、加载配置、启动转发，连接会话并交给会话监管；
//! 任何致命错误都经统一终止路径退出。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coffeel::config::{ensure_config_file, find_config_file, load_config, LoggingSection};
use coffeel::core::shutdown::{terminate, LogPersistCleanup, RelayFlushCleanup};
use coffeel::core::{SessionSupervisor, ShutdownCoordinator, ShutdownManager, ShutdownReason};
use coffeel::observability::{self, LogBook, RelayRoute};
use coffeel::relay::{RelayQueue, WebhookRelay};
use coffeel::session::{BridgeSession, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_book = LogBook::new();
    observability::init(&log_book);
    tracing::info!("Starting CoffeeL v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    // 配置加载前的退出同样需要落盘日志，先按默认目录注册
    let log_persist = Arc::new(LogPersistCleanup::new(
        log_book.clone(),
        &LoggingSection::default(),
    ));
    coordinator.register_shared(log_persist.clone());

    // 配置：命令行参数 > 默认位置；首次运行写入默认配置后退出
    let config_file = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(find_config_file)
        .unwrap_or_else(|| PathBuf::from("config/coffeel.toml"));
    match ensure_config_file(&config_file).context("Failed to write default config") {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!(
                "{} not found, created a default one, please fill it and restart the bot",
                config_file.display()
            );
            terminate(&coordinator, ShutdownReason::Fatal("config missing".to_string())).await;
            return Ok(());
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            terminate(&coordinator, ShutdownReason::Fatal(e.to_string())).await;
            return Ok(());
        }
    }

    let config = match load_config(Some(config_file.clone())) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error trying to parse {}: {}", config_file.display(), e);
            terminate(&coordinator, ShutdownReason::Fatal(e.to_string())).await;
            return Ok(());
        }
    };

    log_persist.configure(&config.logging);

    let queue = RelayQueue::new();
    if let Some(relay) = WebhookRelay::new(&config.webhook.url, queue.clone()) {
        log_book.route_to(RelayRoute {
            queue,
            log_console: config.webhook.log_console,
            log_chat: config.webhook.log_chat,
        });
        let relay = Arc::new(relay);
        Arc::clone(&relay).spawn(Duration::from_secs(5));
        coordinator.register(RelayFlushCleanup::new(relay));
        tracing::info!("Webhook relay started");
    }

    shutdown.install_signal_handlers();
    let mut reasons = shutdown.subscribe();

    let bridge_addr = config.session.bridge_addr.clone();
    let mut supervisor = SessionSupervisor::new(config, shutdown.token());
    let result = supervisor
        .run(|| {
            let addr = bridge_addr.clone();
            async move {
                BridgeSession::connect(&addr)
                    .await
                    .map(|session| session as Arc<dyn Session>)
            }
        })
        .await;

    let reason = match result {
        Ok(()) => reasons.try_recv().unwrap_or(ShutdownReason::Signal),
        Err(e) => ShutdownReason::Fatal(e.to_string()),
    };
    terminate(&coordinator, reason).await;
    Ok(())
}
