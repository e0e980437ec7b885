//! LLC wire types: socket frames in both directions and HTTP payloads.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Event type tags used on the wire and as handler-table keys.
pub mod kinds {
    pub const PRESENCE: &str = "presence";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_REPLY: &str = "message_reply";
    pub const MESSAGE_EDIT: &str = "message_edit";
    pub const COMMAND_CHECK: &str = "command_check";
    pub const LOGIN_FAILURE: &str = "login_failure";
    pub const ONLINE_USERS: &str = "online_users";
    /// Pseudo-type: handler invoked when the socket opens.
    pub const WS_OPEN: &str = "ws_open";
    /// Pseudo-type: handler invoked when the socket closes. Registering it
    /// enables reconnection.
    pub const WS_CLOSE: &str = "ws_close";
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Who or what an outgoing message replies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub text: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ReplyTarget {
    /// Reply context addressing a user's conversation rather than one message.
    pub fn user(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            text: String::new(),
            head: Some(format!("Replying to: {username}")),
            username,
            message_id: None,
        }
    }

    /// Reply context quoting a received event.
    pub fn event(event: &InboundEvent) -> Self {
        Self {
            text: event.text.clone().unwrap_or_default(),
            username: event.username.clone(),
            head: None,
            message_id: event.message_id.clone(),
        }
    }
}

/// A frame this client writes to the socket, before auth fields are added.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Presence,
    Message {
        text: String,
        #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyTarget>,
        #[serde(rename = "isBot")]
        is_bot: bool,
    },
    MessageReply {
        text: String,
        #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyTarget>,
        #[serde(rename = "isBot")]
        is_bot: bool,
    },
    MessageEdit {
        text: String,
        #[serde(rename = "messageID")]
        message_id: String,
    },
    CommandCheck {
        #[serde(rename = "commandName")]
        command_name: String,
    },
}

impl OutboundFrame {
    /// `message`, or `message_reply` when a reply target is given.
    pub fn message(text: impl Into<String>, reply_to: Option<ReplyTarget>, is_bot: bool) -> Self {
        let text = text.into();
        match reply_to {
            Some(target) => OutboundFrame::MessageReply {
                text,
                reply_to: Some(target),
                is_bot,
            },
            None => OutboundFrame::Message {
                text,
                reply_to: None,
                is_bot,
            },
        }
    }

    /// Wire type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Presence => kinds::PRESENCE,
            OutboundFrame::Message { .. } => kinds::MESSAGE,
            OutboundFrame::MessageReply { .. } => kinds::MESSAGE_REPLY,
            OutboundFrame::MessageEdit { .. } => kinds::MESSAGE_EDIT,
            OutboundFrame::CommandCheck { .. } => kinds::COMMAND_CHECK,
        }
    }

    /// Serialize with the auth fields every frame carries: `accessToken`,
    /// `token`, `isOfficialBot: true`, and `correlationId` when given.
    pub fn encode(&self, token: Option<&str>, correlation_id: Option<&str>) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            let token = token.map_or(Value::Null, |t| Value::String(t.to_string()));
            map.insert("accessToken".into(), token.clone());
            map.insert("token".into(), token);
            map.insert("isOfficialBot".into(), Value::Bool(true));
            if let Some(id) = correlation_id {
                map.insert("correlationId".into(), Value::String(id.to_string()));
            }
        }
        Ok(serde_json::to_string(&value)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One event received from the socket.
///
/// The server is loose about types (`messageID` may be numeric, fields may be
/// `null`), so deserialization is lenient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(
        rename = "messageID",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    /// Only an object is a reply; a bare id or other scalar is ignored.
    #[serde(
        rename = "replyTo",
        default,
        deserialize_with = "lenient_reply",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_to: Option<Box<InboundEvent>>,
    /// Set by the server on the echo of this client's own send.
    #[serde(rename = "selfSend", default, deserialize_with = "truthy")]
    pub self_send: bool,
    #[serde(
        default,
        deserialize_with = "lenient_users",
        skip_serializing_if = "Option::is_none"
    )]
    pub users: Option<Vec<String>>,
    #[serde(rename = "correlationId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl InboundEvent {
    /// Parse one raw text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?))
}

fn lenient_reply<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<InboundEvent>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        reply @ Value::Object(_) => serde_json::from_value(reply).ok().map(Box::new),
        _ => None,
    })
}

fn truthy<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn lenient_users<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => Some(items.into_iter().filter_map(value_to_string).collect()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// HTTP payloads
// ---------------------------------------------------------------------------

/// Body of `GET /api/request_access_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `GET /ws-url`.
#[derive(Debug, Clone, Deserialize)]
pub struct WsUrlResponse {
    pub url: String,
}

/// One entry in a command registry update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Add,
    Delete,
}

/// Body of `POST /api/commands/<token>`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandsRequest {
    pub action: CommandAction,
    pub commands: Vec<CommandSpec>,
    pub prefix: String,
}

/// Body of `POST /api/commands/<token>/slash`.
#[derive(Debug, Clone, Serialize)]
pub struct SlashCommandRequest {
    pub command: String,
    pub args: Vec<String>,
}

/// `{ message }` acknowledgement returned by the command endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
