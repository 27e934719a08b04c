//! TCP 桥接会话
//!
//! 游戏协议客户端运行在独立进程中，通过一条 TCP 连接与本进程交换 JSON 行：
//! 入站为 `SessionEvent`，出站为 `{"type":"chat","text":...}` / `{"type":"click","window_id":..,"slot":..}`。
//! 连接断开时广播 `End`，由会话监管决定是否重连。
//! 读任务启动前先订阅一个 Receiver，由 `lifecycle()` 交给会话监管，桥接进程一连上就推送的事件不会丢失。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::{Session, SessionError, SessionEvent};

/// 单行最大长度（服务器的状态行远小于此值）
const MAX_LINE_LENGTH: usize = 64 * 1024;
const EVENT_CAPACITY: usize = 256;

/// 发往桥接进程的命令
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand {
    Chat { text: String },
    Click { window_id: u8, slot: u16 },
}

/// 基于 TCP 的会话实现
pub struct BridgeSession {
    events: broadcast::Sender<SessionEvent>,
    /// 读任务启动前订阅的 Receiver，首次 `lifecycle()` 时取走
    early: Mutex<Option<broadcast::Receiver<SessionEvent>>>,
    outbound: mpsc::UnboundedSender<BridgeCommand>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BridgeSession {
    /// 连接桥接进程并启动读写任务
    pub async fn connect(addr: &str) -> Result<Arc<Self>, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        tracing::info!("Connected to session bridge at {}", addr);

        let (events, early) = broadcast::channel(EVENT_CAPACITY);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<BridgeCommand>();

        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            let mut lines =
                FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
            let reason = loop {
                match lines.next().await {
                    Some(Ok(line)) => match serde_json::from_str::<SessionEvent>(&line) {
                        Ok(event) => {
                            // 无订阅者时 send 返回 Err，属正常情况
                            let _ = reader_events.send(event);
                        }
                        Err(e) => tracing::warn!("Ignoring malformed bridge line: {}", e),
                    },
                    Some(Err(e)) => break format!("bridge read error: {}", e),
                    None => break "bridge connection closed".to_string(),
                }
            };
            tracing::warn!("Session bridge ended: {}", reason);
            let _ = reader_events.send(SessionEvent::End { reason });
        });

        let writer = tokio::spawn(async move {
            let mut sink = FramedWrite::new(write_half, LinesCodec::new());
            while let Some(cmd) = outbound_rx.recv().await {
                let line = match serde_json::to_string(&cmd) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("Failed to encode bridge command: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    tracing::error!("Failed to write to session bridge: {}", e);
                    break;
                }
            }
        });

        Ok(Arc::new(Self {
            events,
            early: Mutex::new(Some(early)),
            outbound,
            reader,
            writer,
        }))
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl Session for BridgeSession {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.early
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    async fn chat(&self, text: &str) -> Result<(), SessionError> {
        tracing::debug!("-> {}", text);
        self.outbound
            .send(BridgeCommand::Chat {
                text: text.to_string(),
            })
            .map_err(|_| SessionError::Closed)
    }

    async fn click_slot(&self, window_id: u8, slot: u16) -> Result<(), SessionError> {
        self.outbound
            .send(BridgeCommand::Click { window_id, slot })
            .map_err(|_| SessionError::Closed)
    }
}
