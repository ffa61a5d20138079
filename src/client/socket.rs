//! WebSocket channel that follows connectivity.
//!
//! The channel connects in the background, delivers frames to subscribers
//! and, after a drop, waits for the [`NetworkMonitor`] to report online
//! before reconnecting.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::network::NetworkMonitor;
use crate::observer::{Publisher, Subscription};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    #[serde(rename = "reconnect_delay_ms", with = "crate::config::duration_ms")]
    pub reconnect_delay: Duration,
    /// How long to wait for the monitor to report online before checking again.
    #[serde(rename = "offline_poll_ms", with = "crate::config::duration_ms")]
    pub offline_poll: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            offline_poll: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected,
    /// Text frame that parsed as JSON.
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
    Disconnected,
}

struct Shared {
    url: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    publisher: Publisher<SocketEvent>,
    closed: CancellationToken,
}

pub struct SocketChannel {
    shared: Arc<Shared>,
}

/// `http(s)` URLs map onto `ws(s)`.
fn socket_url(url: String) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url
    }
}

impl SocketChannel {
    /// Start connecting in the background. Must be called inside a tokio runtime.
    pub fn connect(url: impl Into<String>, monitor: Arc<NetworkMonitor>, config: SocketConfig) -> Self {
        let shared = Arc::new(Shared {
            url: socket_url(url.into()),
            outgoing: Mutex::new(None),
            publisher: Publisher::new(),
            closed: CancellationToken::new(),
        });
        tokio::spawn(run(Arc::clone(&shared), monitor, config));
        Self { shared }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn is_connected(&self) -> bool {
        self.shared.outgoing.lock().is_some()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.shared.publisher.subscribe(handler)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        self.send(Message::Text(serde_json::to_string(value)?))
    }

    fn send(&self, message: Message) -> Result<()> {
        let outgoing = self.shared.outgoing.lock();
        match outgoing.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| Error::network(format!("socket {} closed", self.shared.url))),
            None => Err(Error::network(format!("socket {} not connected", self.shared.url))),
        }
    }

    /// Close for good; no reconnect follows.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}

fn decode(message: Message) -> Option<SocketEvent> {
    match message {
        Message::Text(text) => Some(match serde_json::from_str(&text) {
            Ok(value) => SocketEvent::Json(value),
            Err(_) => SocketEvent::Text(text),
        }),
        Message::Binary(bytes) => Some(SocketEvent::Binary(bytes)),
        _ => None,
    }
}

async fn run(shared: Arc<Shared>, monitor: Arc<NetworkMonitor>, config: SocketConfig) {
    while !shared.closed.is_cancelled() {
        if !monitor.is_online() {
            tokio::select! {
                _ = shared.closed.cancelled() => break,
                _ = monitor.wait_for_connection(config.offline_poll) => continue,
            }
        }

        match tokio_tungstenite::connect_async(shared.url.as_str()).await {
            Ok((stream, _)) => {
                info!(url = %shared.url, "socket connected");
                let (mut sink, mut frames) = stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel();
                *shared.outgoing.lock() = Some(tx);
                shared.publisher.publish(&SocketEvent::Connected);

                loop {
                    tokio::select! {
                        _ = shared.closed.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        Some(message) = rx.recv() => {
                            if let Err(e) = sink.send(message).await {
                                warn!(url = %shared.url, error = %e, "socket send failed");
                                break;
                            }
                        }
                        frame = frames.next() => match frame {
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(message)) => {
                                if let Some(event) = decode(message) {
                                    shared.publisher.publish(&event);
                                }
                            }
                            Some(Err(e)) => {
                                warn!(url = %shared.url, error = %e, "socket read failed");
                                break;
                            }
                        },
                    }
                }

                *shared.outgoing.lock() = None;
                shared.publisher.publish(&SocketEvent::Disconnected);
                debug!(url = %shared.url, "socket disconnected");
            }
            Err(e) => warn!(url = %shared.url, error = %e, "socket connect failed"),
        }

        tokio::select! {
            _ = shared.closed.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}
