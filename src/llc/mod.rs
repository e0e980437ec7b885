//! # LLC client
//!
//! Native client for the LLC real-time chat service.
//!
//! ## What It Does
//!
//! 1. **Token exchange**: trades the bot's username for an access token
//!    (`GET /api/request_access_token`).
//! 2. **Socket session**: connects to the advertised socket, announces
//!    presence, and reconnects on close when a `ws_close` handler exists.
//! 3. **Routing**: each inbound frame goes to a pending send (echoes), the
//!    handler registered for its type, and the generic callback.
//! 4. **Command registry**: adds, deletes and lists bot commands over HTTP.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let client = BridgeClient::new(BridgeConfig::new("mybot"));
//! client.on(&[kinds::MESSAGE], event_handler(|ev| async move {
//!     println!("{}: {:?}", ev.username, ev.text);
//! }));
//! client.start_listening(None).await;
//! let echo = client.send_message("hello", None, false).await?;
//! ```

pub mod client;
pub mod correlator;
pub mod endpoint;
pub mod protocol;
pub mod router;
pub mod transport;

pub use client::{BridgeClient, SessionState};
pub use correlator::{Correlator, PendingEcho};
pub use endpoint::{HttpEndpoint, RemoteEndpoint};
pub use protocol::{kinds, CommandSpec, InboundEvent, OutboundFrame, ReplyTarget};
pub use router::{event_handler, EventHandler, EventRouter, Routed};
pub use transport::{Connection, Connector, MemoryConnector, MemoryPeer, TransportEvent, WsConnector};
