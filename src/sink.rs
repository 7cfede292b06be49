//! Downstream event sink
//!
//! Delivers canonical events to the consuming process over a Unix socket,
//! length-prefixed MessagePack. Delivery failures never kill the feed: the
//! sink drops the event and reconnects lazily on the next publish.

use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result};
use crate::events::CanonicalEvent;

/// Sink for canonical events, shared by all connections
pub struct EventSink {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl EventSink {
    pub async fn new(socket_path: &str) -> Result<Self> {
        let sink = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // Initial connection may fail if the consumer isn't up yet
        if let Err(e) = sink.connect().await {
            warn!(error = %e, "Initial sink connection failed, will retry on publish");
        }

        Ok(sink)
    }

    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(FeedError::Sink(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            FeedError::Sink(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to event sink");
        Ok(())
    }

    /// Publish one canonical event, in production order per connection
    pub async fn publish(&self, event: &CanonicalEvent) -> Result<()> {
        let data = rmp_serde::to_vec_named(event)
            .map_err(|e| FeedError::Serialization(format!("Failed to serialize: {}", e)))?;

        let len = (data.len() as u32).to_be_bytes();
        let mut message = Vec::with_capacity(4 + data.len());
        message.extend_from_slice(&len);
        message.extend_from_slice(&data);

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to sink");
                return Ok(());
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&message).await {
                Ok(_) => {
                    debug!(pair = %event.pair(), "Published event");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write to sink");
                    *guard = None;
                }
            }
        }

        Ok(())
    }
}
