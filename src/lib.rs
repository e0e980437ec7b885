//! Bridge between a thread-based chat-bot framework and the LLC real-time
//! chat service.
//!
//! - [`llc`]: the socket session, HTTP endpoint and event routing.
//! - [`adapter`]: framework-shaped API over a session plus an optional legacy
//!   backend, selected per identifier by the `LLC:` marker.
//! - [`composer`]: resolves any method name against adapter, legacy backend
//!   and a logging no-op, in that order.

pub mod adapter;
pub mod cli;
pub mod composer;
pub mod config;
pub mod error;
pub mod llc;

pub use adapter::{BridgeApi, NormalizedMessage, ThreadInfo};
pub use composer::{login, CapabilityProvider, ComposedApi, LegacyLogin, NoopProvider};
pub use config::{BridgeConfig, CorrelationMode};
pub use error::{BridgeError, Result};
pub use llc::BridgeClient;
