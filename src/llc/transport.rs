//! Socket transport seam.
//!
//! A [`Connector`] turns a URL into a [`Connection`]: a sender for outgoing
//! text frames and a stream of [`TransportEvent`]s. [`WsConnector`] speaks
//! real WebSockets; [`MemoryConnector`] hands the far end to the caller so a
//! session can be driven without any I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Lifecycle and data events observed on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Frame(String),
    Error(String),
    Closed,
}

/// Instructions for the writer side of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Frame(String),
    Close,
}

/// One live connection.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outgoing>,
    pub inbound: BoxStream<'static, TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// tokio-tungstenite connector. A writer task drains the outbound channel
/// into the socket sink.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| BridgeError::Connect {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let (mut sink, read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Outgoing::Frame(text) => {
                        if let Err(e) = sink.send(WsMessage::Text(text)).await {
                            warn!(error = %e, "socket write failed");
                            break;
                        }
                    }
                    Outgoing::Close => break,
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        let frames = read.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(text)) => Some(TransportEvent::Frame(text)),
                Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes).ok().map(TransportEvent::Frame),
                Ok(WsMessage::Close(_)) => None,
                Ok(_) => None, // ping / pong
                Err(e) => Some(TransportEvent::Error(e.to_string())),
            }
        });
        let inbound = stream::once(async { TransportEvent::Open })
            .chain(frames)
            .chain(stream::once(async { TransportEvent::Closed }))
            .boxed();

        Ok(Connection {
            outbound: tx,
            inbound,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// The far end of a [`MemoryConnector`] connection.
pub struct MemoryPeer {
    pub url: String,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Deliver a raw text frame to the session.
    pub fn push(&self, raw: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Frame(raw.into()));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(value.to_string());
    }

    pub fn error(&self, detail: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Error(detail.into()));
    }

    /// Simulate the server closing the socket.
    pub fn close(&self) {
        let _ = self.inbound.send(TransportEvent::Closed);
    }

    /// Next frame the session wrote, or `None` once it closed its side.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                Outgoing::Frame(text) => return Some(text),
                Outgoing::Close => return None,
            }
        }
    }

    /// Next frame parsed as JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let text = self.next_frame().await?;
        serde_json::from_str(&text).ok()
    }

    /// Frame already written, without waiting.
    pub fn try_next_frame(&mut self) -> Option<String> {
        match self.outbound.try_recv() {
            Ok(Outgoing::Frame(text)) => Some(text),
            _ => None,
        }
    }
}

/// Loopback connector: every `connect` yields a [`MemoryPeer`] on the
/// receiver returned by [`MemoryConnector::new`]. Connections open at once.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    connects: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                connects: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Number of connections made so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// URLs connected to, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = in_tx.send(TransportEvent::Open);

        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.to_string());
        }
        debug!(url, "memory connection opened");

        self.peers
            .send(MemoryPeer {
                url: url.to_string(),
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| BridgeError::Connect {
                url: url.to_string(),
                detail: "memory peer receiver dropped".into(),
            })?;

        Ok(Connection {
            outbound: out_tx,
            inbound: UnboundedReceiverStream::new(in_rx).boxed(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
