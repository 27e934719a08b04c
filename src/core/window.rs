//! 访问窗口交互：`/visit <玩家>` 后服务器弹出窗口，需点击其中的传送物品（头颅）

use std::path::Path;
use std::time::Duration;

use crate::core::wait::Listener;
use crate::core::CoffeeError;
use crate::session::{Session, SessionEvent, Window};

/// 传送物品在窗口中的物品名
pub const TELEPORT_ITEM: &str = "skull";

/// 等待窗口打开并点击传送物品；窗口未在 `within` 内打开时返回 false。
/// 找不到传送物品为致命错误，窗口内容会写入 `dump_path` 以便排查。
pub async fn click_teleport_item(
    session: &dyn Session,
    listener: &mut Listener,
    within: Duration,
    dump_path: &Path,
) -> Result<bool, CoffeeError> {
    let window = listener
        .wait_for(within, |event| match event {
            SessionEvent::WindowOpen(window) => Some(window.clone()),
            _ => None,
        })
        .await?;

    let Some(window) = window else {
        tracing::warn!("Visit window did not open within {:?}", within);
        return Ok(false);
    };

    let Some(item) = window.find_item(TELEPORT_ITEM) else {
        tracing::error!(
            "Failed to find TP item, you probably should report this attaching the {} file",
            dump_path.display()
        );
        dump_window(&window, dump_path)?;
        return Err(CoffeeError::MissingInteractionTarget {
            window: window.title.clone(),
        });
    };

    tracing::info!("Clicking TP item");
    session.click_slot(window.id, item.slot).await?;
    Ok(true)
}

fn dump_window(window: &Window, path: &Path) -> Result<(), CoffeeError> {
    let json = serde_json::to_string_pretty(window).map_err(std::io::Error::from)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockSession, WindowSlot};

    fn visit_window(slots: Vec<WindowSlot>) -> Window {
        Window {
            id: 7,
            title: "Visit Steve".to_string(),
            slots,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clicks_skull_slot() {
        let session = MockSession::new();
        let dir = tempfile::tempdir().unwrap();
        let mut listener = Listener::attach(&session, "window");
        session.emit(SessionEvent::WindowOpen(visit_window(vec![
            WindowSlot {
                slot: 4,
                name: "stained_glass_pane".to_string(),
            },
            WindowSlot {
                slot: 11,
                name: "skull".to_string(),
            },
        ])));

        let clicked = click_teleport_item(
            &session,
            &mut listener,
            Duration::from_secs(10),
            &dir.path().join("window.json"),
        )
        .await
        .unwrap();
        assert!(clicked);
        assert_eq!(session.clicks(), vec![(7, 11)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_item_dumps_window() {
        let session = MockSession::new();
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("window.json");
        let mut listener = Listener::attach(&session, "window");
        session.emit(SessionEvent::WindowOpen(visit_window(vec![])));

        let err = click_teleport_item(&session, &mut listener, Duration::from_secs(10), &dump)
            .await
            .unwrap_err();
        assert!(matches!(err, CoffeeError::MissingInteractionTarget { .. }));
        assert!(err.is_fatal());

        let dumped: Window = serde_json::from_str(&std::fs::read_to_string(&dump).unwrap()).unwrap();
        assert_eq!(dumped.title, "Visit Steve");
        assert!(session.clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_timeout() {
        let session = MockSession::new();
        let dir = tempfile::tempdir().unwrap();
        let mut listener = Listener::attach(&session, "window");

        let clicked = click_teleport_item(
            &session,
            &mut listener,
            Duration::from_secs(10),
            &dir.path().join("window.json"),
        )
        .await
        .unwrap();
        assert!(!clicked);
    }
}
