//! Server-Sent Events output encoding.
//!
//! Every event becomes one `event: <type>\ndata: <json>\n\n` frame, written
//! and flushed before the call returns so partial output reaches the client
//! without buffering delay. The encoder is thread-safe: turn events and the
//! keep-alive ticker interleave on the same writer through one async mutex.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use overture_agent::{EventSink, TurnEvent};

/// Frame encoder over any incrementally-flushable transport.
pub struct SseEncoder<W> {
    writer: Mutex<W>,
}

impl<W> SseEncoder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Serialize, frame, write, flush.
    pub async fn write_event(&self, event: &TurnEvent) -> std::io::Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let frame = format!("event: {}\ndata: {}\n\n", event.event_type(), payload);

        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    }

    /// Recover the underlying writer (tests).
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> EventSink for SseEncoder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, event: TurnEvent) -> std::io::Result<()> {
        self.write_event(&event).await
    }
}

/// The keep-alive ticker for one turn.
///
/// Emits `ping` frames on a fixed interval until shut down; `shutdown`
/// cancels the task and awaits it, guaranteeing no write lands on the
/// transport after it returns.
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn spawn(sink: Arc<dyn EventSink>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if sink.emit(TurnEvent::Ping).await.is_err() {
                    return;
                }
            }
        });
        Self { handle }
    }

    /// Cancel the ticker and wait for it to finish.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
