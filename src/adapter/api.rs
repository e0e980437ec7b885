//! Framework-vocabulary API over an LLC session and an optional legacy
//! backend.
//!
//! Identifiers carrying the `LLC:` marker go to the session; everything else
//! is passed through unchanged to the legacy provider when one is present.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::address::{strip_marker_len, Address};
use super::converter::{convert_event, NormalizedMessage};
use crate::composer::{methods, Args, CapabilityProvider};
use crate::error::{BridgeError, Result};
use crate::llc::client::BridgeClient;
use crate::llc::protocol::{kinds, ReplyTarget};
use crate::llc::router::event_handler;

/// Body used when a bridge-bound message has no text.
const EMPTY_BODY: &str = "Empty";

/// Callback receiving every normalized message from either backend.
pub type MessageHandler = Arc<dyn Fn(NormalizedMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(NormalizedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Method installed at runtime through property assignment.
pub type MethodFn = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`MethodFn`].
pub fn method_fn<F, Fut>(f: F) -> MethodFn
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// A value or method assigned onto the adapter.
#[derive(Clone)]
pub enum Property {
    Value(Value),
    Method(MethodFn),
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Property::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Property::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// Outgoing message: a body plus whatever other fields the legacy backend
/// understands (attachments, mentions, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageForm {
    pub body: Option<String>,
    pub extra: Map<String, Value>,
}

impl MessageForm {
    /// Accepts a bare string or an object with a `body` field; anything else
    /// is an empty form.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(body) => Self {
                body: Some(body),
                extra: Map::new(),
            },
            Value::Object(mut map) => {
                let body = match map.remove("body") {
                    Some(Value::String(s)) => Some(s),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                };
                Self { body, extra: map }
            }
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        if let Some(body) = &self.body {
            map.insert("body".into(), Value::String(body.clone()));
        }
        Value::Object(map)
    }
}

impl From<&str> for MessageForm {
    fn from(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            extra: Map::new(),
        }
    }
}

impl From<String> for MessageForm {
    fn from(body: String) -> Self {
        Self {
            body: Some(body),
            extra: Map::new(),
        }
    }
}

/// Where a send ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum SendReceipt {
    /// Sent over LLC; the echo, normalized.
    Bridge(NormalizedMessage),
    /// Passed to the legacy backend; its return value.
    Legacy(Value),
    /// Legacy identifier but no legacy backend can send.
    Unrouted,
}

impl SendReceipt {
    pub fn into_value(self) -> Result<Value> {
        match self {
            SendReceipt::Bridge(msg) => Ok(serde_json::to_value(msg)?),
            SendReceipt::Legacy(v) => Ok(v),
            SendReceipt::Unrouted => Ok(Value::Null),
        }
    }
}

/// Thread description in the framework's shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    #[serde(rename = "adminIDs", default)]
    pub admin_ids: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "participantIDs", default)]
    pub participant_ids: Vec<String>,
    /// Other fields a legacy backend returned, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// The protocol adapter.
pub struct BridgeApi {
    client: Arc<BridgeClient>,
    legacy: Option<Arc<dyn CapabilityProvider>>,
    listener: Arc<RwLock<Option<MessageHandler>>>,
    properties: RwLock<HashMap<String, Property>>,
}

impl BridgeApi {
    pub fn new(client: Arc<BridgeClient>, legacy: Option<Arc<dyn CapabilityProvider>>) -> Self {
        Self {
            client,
            legacy,
            listener: Arc::new(RwLock::new(None)),
            properties: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<BridgeClient> {
        &self.client
    }

    pub fn legacy(&self) -> Option<&Arc<dyn CapabilityProvider>> {
        self.legacy.as_ref()
    }

    fn legacy_with(&self, method: &str) -> Option<&Arc<dyn CapabilityProvider>> {
        self.legacy.as_ref().filter(|l| l.supports(method))
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Send `form` to `thread_id`.
    ///
    /// Bridge threads get an LLC message replying to the thread's user; the
    /// echo comes back normalized. Legacy threads are forwarded verbatim,
    /// with `reply_to_message` as the third argument when given.
    pub async fn send_message(
        &self,
        form: impl Into<MessageForm>,
        thread_id: &str,
        reply_to_message: Option<&str>,
    ) -> Result<SendReceipt> {
        let form = form.into();
        match Address::parse(thread_id) {
            Address::Bridge(username) => {
                let text = form
                    .body
                    .as_deref()
                    .filter(|b| !b.is_empty())
                    .unwrap_or(EMPTY_BODY);
                let echo = self
                    .client
                    .send_message(text, Some(ReplyTarget::user(username)), false)
                    .await?;
                let depth = self.client.config().max_reply_depth;
                Ok(SendReceipt::Bridge(convert_event(&echo, depth)))
            }
            Address::Legacy(thread) => {
                let Some(legacy) = self.legacy_with(methods::SEND_MESSAGE) else {
                    debug!(thread, "no legacy backend for sendMessage");
                    return Ok(SendReceipt::Unrouted);
                };
                let mut args = vec![form.to_value(), Value::String(thread.to_string())];
                if let Some(reply) = reply_to_message {
                    args.push(Value::String(reply.to_string()));
                }
                Ok(SendReceipt::Legacy(
                    legacy.invoke(methods::SEND_MESSAGE, args).await?,
                ))
            }
        }
    }

    /// Replace a sent message's text. Fire-and-forget on the bridge side.
    pub async fn edit_message(&self, text: &str, message_id: &str) -> Result<()> {
        match Address::parse(message_id) {
            Address::Bridge(native) => self.client.edit_message(text, native),
            Address::Legacy(id) => {
                if let Some(legacy) = self.legacy_with(methods::EDIT_MESSAGE) {
                    legacy
                        .invoke(
                            methods::EDIT_MESSAGE,
                            vec![Value::String(text.to_string()), Value::String(id.to_string())],
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Deliver messages from both backends to `handler`.
    ///
    /// Registers the conversion for `message` and `message_reply`, starts the
    /// LLC session, then starts the legacy listener with the same handler.
    pub async fn listen(&self, handler: MessageHandler) -> Result<()> {
        if let Ok(mut slot) = self.listener.write() {
            *slot = Some(Arc::clone(&handler));
        }

        let listener = Arc::clone(&self.listener);
        let depth = self.client.config().max_reply_depth;
        self.client.on(
            &[kinds::MESSAGE, kinds::MESSAGE_REPLY],
            event_handler(move |event| {
                let current = listener.read().ok().and_then(|l| l.clone());
                async move {
                    if let Some(h) = current {
                        h(convert_event(&event, depth)).await;
                    }
                }
            }),
        );
        self.client.start_listening(None).await;

        let legacy = self
            .legacy_with(methods::LISTEN_MQTT)
            .or_else(|| self.legacy_with(methods::LISTEN));
        if let Some(legacy) = legacy {
            info!(provider = legacy.name(), "starting legacy listener");
            legacy.listen(handler).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Threads and state
    // -----------------------------------------------------------------------

    fn synthesized_thread(&self, thread_id: &str) -> ThreadInfo {
        ThreadInfo {
            admin_ids: Vec::new(),
            name: strip_marker_len(thread_id),
            participant_ids: self.client.online_users(),
            extra: Map::new(),
        }
    }

    /// Bridge threads are described from the online-user snapshot. Legacy
    /// threads ask the legacy backend and fall back to the same synthesis
    /// when it has nothing.
    pub async fn get_thread_info(&self, thread_id: &str) -> Result<ThreadInfo> {
        let synthesized = self.synthesized_thread(thread_id);
        if Address::parse(thread_id).is_bridge() {
            return Ok(synthesized);
        }
        let Some(legacy) = self.legacy_with(methods::GET_THREAD_INFO) else {
            return Ok(synthesized);
        };
        let value = legacy
            .invoke(
                methods::GET_THREAD_INFO,
                vec![Value::String(thread_id.to_string())],
            )
            .await?;
        if value.is_null() {
            return Ok(synthesized);
        }
        Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(error = %e, "legacy thread info unreadable, synthesizing");
            synthesized
        }))
    }

    /// Legacy session state, or an empty list.
    pub async fn get_app_state(&self) -> Result<Vec<Value>> {
        let Some(legacy) = self.legacy_with(methods::GET_APP_STATE) else {
            return Ok(Vec::new());
        };
        match legacy.invoke(methods::GET_APP_STATE, Vec::new()).await? {
            Value::Array(items) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Assigned properties
    // -----------------------------------------------------------------------

    /// Set a property on the adapter. Assigned methods shadow built-ins.
    pub fn assign(&self, name: &str, property: Property) {
        if let Ok(mut props) = self.properties.write() {
            props.insert(name.to_string(), property);
        }
    }

    fn assigned(&self, name: &str) -> Option<Property> {
        self.properties.read().ok()?.get(name).cloned()
    }

    fn assigned_method(&self, name: &str) -> Option<MethodFn> {
        match self.assigned(name)? {
            Property::Method(m) => Some(m),
            Property::Value(_) => None,
        }
    }
}

fn arg_string(args: &[Value], index: usize) -> Option<String> {
    match args.get(index)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn required_arg(args: &[Value], index: usize, name: &str) -> Result<String> {
    arg_string(args, index).ok_or_else(|| BridgeError::InvalidArgument(format!("missing {name}")))
}

const BUILT_INS: &[&str] = &[
    methods::SEND_MESSAGE,
    methods::EDIT_MESSAGE,
    methods::LISTEN,
    methods::LISTEN_MQTT,
    methods::GET_THREAD_INFO,
    methods::GET_APP_STATE,
];

#[async_trait]
impl CapabilityProvider for BridgeApi {
    fn name(&self) -> &str {
        "llc"
    }

    fn supports(&self, method: &str) -> bool {
        self.assigned_method(method).is_some() || BUILT_INS.contains(&method)
    }

    async fn invoke(&self, method: &str, args: Args) -> Result<Value> {
        if let Some(assigned) = self.assigned_method(method) {
            return assigned(args).await;
        }
        match method {
            methods::SEND_MESSAGE => {
                let form = MessageForm::from_value(args.first().cloned().unwrap_or(Value::Null));
                let thread = required_arg(&args, 1, "thread id")?;
                let reply = arg_string(&args, 2);
                self.send_message(form, &thread, reply.as_deref())
                    .await?
                    .into_value()
            }
            methods::EDIT_MESSAGE => {
                let text = arg_string(&args, 0).unwrap_or_default();
                let id = required_arg(&args, 1, "message id")?;
                self.edit_message(&text, &id).await?;
                Ok(Value::Null)
            }
            methods::GET_THREAD_INFO => {
                let thread = required_arg(&args, 0, "thread id")?;
                Ok(serde_json::to_value(self.get_thread_info(&thread).await?)?)
            }
            methods::GET_APP_STATE => Ok(Value::Array(self.get_app_state().await?)),
            methods::LISTEN | methods::LISTEN_MQTT => Err(BridgeError::InvalidArgument(
                "listen takes a handler; call listen() directly".into(),
            )),
            other => Err(BridgeError::Unsupported(other.to_string())),
        }
    }

    async fn listen(&self, handler: MessageHandler) -> Result<()> {
        BridgeApi::listen(self, handler).await
    }

    fn property(&self, name: &str) -> Option<Value> {
        match self.assigned(name)? {
            Property::Value(v) => Some(v),
            Property::Method(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn form_from_string_and_object() {
        assert_eq!(MessageForm::from_value(json!("hi")).body.as_deref(), Some("hi"));

        let form = MessageForm::from_value(json!({"body": "b", "mentions": [1]}));
        assert_eq!(form.body.as_deref(), Some("b"));
        assert_eq!(form.extra.get("mentions"), Some(&json!([1])));
        assert_eq!(form.to_value(), json!({"body": "b", "mentions": [1]}));

        assert_eq!(MessageForm::from_value(json!(12)), MessageForm::default());
    }

    #[test]
    fn thread_info_serializes_framework_names() {
        let info = ThreadInfo {
            name: "alice".into(),
            participant_ids: vec!["alice".into()],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"adminIDs": [], "name": "alice", "participantIDs": ["alice"]})
        );
    }

    #[test]
    fn thread_info_keeps_legacy_extras_and_tolerates_null_name() {
        let info: ThreadInfo = serde_json::from_value(json!({
            "adminIDs": [{"id": "1"}],
            "name": null,
            "participantIDs": ["1", "2"],
            "emoji": "👍"
        }))
        .unwrap();
        assert_eq!(info.name, "");
        assert_eq!(info.participant_ids.len(), 2);
        assert_eq!(info.extra.get("emoji"), Some(&json!("👍")));
    }

    #[test]
    fn receipt_into_value() {
        assert_eq!(SendReceipt::Unrouted.into_value().unwrap(), Value::Null);
        assert_eq!(SendReceipt::Legacy(json!({"ok": 1})).into_value().unwrap(), json!({"ok": 1}));
    }

    #[test]
    fn arg_string_stringifies_numbers() {
        let args = vec![json!(100), Value::Null, json!("x")];
        assert_eq!(arg_string(&args, 0).as_deref(), Some("100"));
        assert_eq!(arg_string(&args, 1), None);
        assert_eq!(arg_string(&args, 2).as_deref(), Some("x"));
        assert_eq!(arg_string(&args, 9), None);
    }
}
