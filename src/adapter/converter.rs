//! Converts LLC inbound events into the framework's message shape.
//!
//! ## Mapping
//! | InboundEvent field | NormalizedMessage field | Notes                          |
//! |--------------------|-------------------------|--------------------------------|
//! | text               | body                    | `""` when absent               |
//! | username           | senderID, threadID      | prefixed with `LLC:`           |
//! | messageID          | messageID               | prefixed with `LLC:`           |
//! | type               | type                    | unchanged                      |
//! | replyTo            | messageReply            | converted the same way, nested |
//! | (none)             | timestamp               | conversion time, epoch ms      |
//! | (none)             | attachments, isGroup    | always `[]` and `true`         |
//!
//! Reply chains are walked iteratively and cut at a maximum depth, so a
//! hostile chain cannot exhaust the stack.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::address::bridge_id;
use crate::llc::protocol::InboundEvent;

/// Backend-independent message, as framework handlers expect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub body: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "messageReply", default)]
    pub message_reply: Option<Box<NormalizedMessage>>,
    #[serde(rename = "threadID")]
    pub thread_id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
}

impl NormalizedMessage {
    /// Number of levels in this message's reply chain, itself included.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut cursor = self.message_reply.as_deref();
        while let Some(reply) = cursor {
            depth += 1;
            cursor = reply.message_reply.as_deref();
        }
        depth
    }
}

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn convert_level(event: &InboundEvent, timestamp: u64) -> NormalizedMessage {
    let sender = bridge_id(&event.username);
    NormalizedMessage {
        body: event.text.clone().unwrap_or_default(),
        message_id: bridge_id(event.message_id.as_deref().unwrap_or_default()),
        kind: event.kind.clone(),
        message_reply: None,
        thread_id: sender.clone(),
        sender_id: sender,
        timestamp,
        attachments: Vec::new(),
        is_group: true,
    }
}

/// Convert `event` and its reply chain, keeping at most `max_depth` levels
/// (at least one).
pub fn convert_event(event: &InboundEvent, max_depth: usize) -> NormalizedMessage {
    let limit = max_depth.max(1);
    let timestamp = now_ms();

    let mut chain = Vec::new();
    let mut cursor = Some(event);
    while let Some(level) = cursor {
        if chain.len() == limit {
            debug!(limit, "reply chain truncated");
            break;
        }
        chain.push(level);
        cursor = level.reply_to.as_deref();
    }

    let mut built: Option<Box<NormalizedMessage>> = None;
    for level in chain.into_iter().rev() {
        let mut message = convert_level(level, timestamp);
        message.message_reply = built;
        built = Some(Box::new(message));
    }
    built.map_or_else(|| convert_level(event, timestamp), |b| *b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str, user: &str, id: &str) -> InboundEvent {
        InboundEvent {
            kind: "message".into(),
            text: Some(text.into()),
            username: user.into(),
            message_id: Some(id.into()),
            ..Default::default()
        }
    }

    fn chain(depth: usize) -> InboundEvent {
        let mut root = event("same", "u0", "m0");
        for i in 1..depth {
            let mut outer = event("same", &format!("u{i}"), &format!("m{i}"));
            outer.kind = "message_reply".into();
            outer.reply_to = Some(Box::new(root));
            root = outer;
        }
        root
    }

    #[test]
    fn flat_event_fields_are_prefixed() {
        let msg = convert_event(&event("hi", "alice", "42"), 64);
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.sender_id, "LLC:alice");
        assert_eq!(msg.thread_id, "LLC:alice");
        assert_eq!(msg.message_id, "LLC:42");
        assert_eq!(msg.kind, "message");
        assert!(msg.message_reply.is_none());
        assert!(msg.timestamp > 1_700_000_000_000);
    }

    #[test]
    fn attachments_and_group_flag_are_fixed() {
        let msg = convert_event(&chain(3), 64);
        let mut cursor = Some(&msg);
        while let Some(m) = cursor {
            assert!(m.attachments.is_empty());
            assert!(m.is_group);
            cursor = m.message_reply.as_deref();
        }
    }

    #[test]
    fn missing_text_becomes_empty_body() {
        let mut ev = event("", "bob", "1");
        ev.text = None;
        assert_eq!(convert_event(&ev, 64).body, "");
    }

    #[test]
    fn three_level_chain_converts_to_three_levels() {
        let msg = convert_event(&chain(3), 64);
        assert_eq!(msg.depth(), 3);
        let second = msg.message_reply.as_deref().unwrap();
        let third = second.message_reply.as_deref().unwrap();
        for level in [&msg, second, third] {
            assert_eq!(level.body, "same");
        }
        assert_eq!(msg.sender_id, "LLC:u2");
        assert_eq!(third.sender_id, "LLC:u0");
        assert!(third.message_reply.is_none());
    }

    #[test]
    fn depth_guard_truncates_long_chains() {
        let msg = convert_event(&chain(100), 10);
        assert_eq!(msg.depth(), 10);
        assert_eq!(msg.sender_id, "LLC:u99");
    }

    #[test]
    fn zero_depth_still_converts_root() {
        let msg = convert_event(&chain(2), 0);
        assert_eq!(msg.depth(), 1);
    }

    #[test]
    fn serializes_with_framework_field_names() {
        let v = serde_json::to_value(convert_event(&event("x", "a", "1"), 64)).unwrap();
        for key in ["body", "senderID", "messageID", "type", "messageReply", "threadID", "timestamp", "attachments", "isGroup"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        assert_eq!(v["messageReply"], serde_json::Value::Null);
    }
}
