//! Framework-facing side of the bridge.

pub mod address;
pub mod api;
pub mod converter;

pub use address::{bridge_id, strip_marker_len, Address, BRIDGE_MARKER};
pub use api::{
    message_handler, method_fn, BridgeApi, MessageForm, MessageHandler, MethodFn, Property,
    SendReceipt, ThreadInfo,
};
pub use converter::{convert_event, NormalizedMessage};
