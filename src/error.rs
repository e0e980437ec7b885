//! Crate-level error type.
//!
//! Connection-lifecycle failures are caught and logged at the session
//! boundary; the only variant routinely surfaced to callers of a send is
//! [`BridgeError::NotReady`].

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the bridge client, adapter and composer.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The access-token endpoint refused the identity.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A frame was sent while no connection is open.
    #[error("Connection not ready!")]
    NotReady,

    /// The server reported a login failure for this identity.
    #[error("Remote login failure for {0}")]
    RemoteFatal(String),

    /// The remote server replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A TCP-level connection could not be established.
    #[error("Connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// A body could not be parsed as the expected JSON structure.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection closed while a send was waiting for its echo.
    #[error("Connection closed before the echo arrived")]
    ConnectionClosed,

    /// No echo arrived within the configured bound.
    #[error("No echo within {0:?}")]
    EchoTimeout(Duration),

    /// A provider was asked for a method it does not define.
    #[error("Unsupported method: {0}")]
    Unsupported(String),

    /// Arguments passed through a dynamic call did not have the expected shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            field: "frame".into(),
            detail: err.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::WebSocket(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
