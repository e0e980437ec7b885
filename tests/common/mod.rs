//! Shared fixtures: a scripted HTTP endpoint, a recording legacy provider,
//! and helpers for driving a session over the in-memory transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use llc_bridge::adapter::MessageHandler;
use llc_bridge::composer::{Args, CapabilityProvider};
use llc_bridge::error::{BridgeError, Result};
use llc_bridge::llc::endpoint::RemoteEndpoint;
use llc_bridge::llc::protocol::{CommandsRequest, SlashCommandRequest};
use llc_bridge::llc::{BridgeClient, MemoryConnector, MemoryPeer, SessionState};
use llc_bridge::BridgeConfig;

pub const TOKEN: &str = "tok-123";
pub const WS_URL: &str = "mem://llc/ws";

/// Endpoint returning a fixed token (or refusing) and recording registry calls.
#[derive(Default)]
pub struct ScriptedEndpoint {
    pub refuse: bool,
    pub token_requests: Mutex<usize>,
    pub commands: Mutex<Vec<(String, CommandsRequest)>>,
    pub slash: Mutex<Vec<(String, SlashCommandRequest)>>,
}

#[async_trait]
impl RemoteEndpoint for ScriptedEndpoint {
    async fn request_access_token(&self, username: &str) -> Result<String> {
        *self.token_requests.lock().unwrap() += 1;
        if self.refuse {
            return Err(BridgeError::Authentication(format!("{username} is taken")));
        }
        Ok(TOKEN.to_string())
    }

    async fn ws_url(&self) -> Result<String> {
        Ok(WS_URL.to_string())
    }

    async fn update_commands(&self, token: &str, request: &CommandsRequest) -> Result<String> {
        self.commands
            .lock()
            .unwrap()
            .push((token.to_string(), request.clone()));
        Ok("Commands updated".into())
    }

    async fn command_prefixes(&self) -> Result<Value> {
        Ok(json!(["!", "/"]))
    }

    async fn send_slash_command(&self, token: &str, request: &SlashCommandRequest) -> Result<String> {
        self.slash
            .lock()
            .unwrap()
            .push((token.to_string(), request.clone()));
        Ok("ok".into())
    }
}

pub struct Harness {
    pub client: Arc<BridgeClient>,
    pub endpoint: Arc<ScriptedEndpoint>,
    pub connector: Arc<MemoryConnector>,
    pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

pub fn harness(config: BridgeConfig) -> Harness {
    harness_with(config, ScriptedEndpoint::default())
}

pub fn harness_with(config: BridgeConfig, endpoint: ScriptedEndpoint) -> Harness {
    let (connector, peers) = MemoryConnector::new();
    let endpoint = Arc::new(endpoint);
    let connector = Arc::new(connector);
    let client = BridgeClient::with_parts(config, endpoint.clone(), connector.clone());
    Harness {
        client,
        endpoint,
        connector,
        peers,
    }
}

/// Default test config: no process exit, no reconnect wait.
pub fn config() -> BridgeConfig {
    BridgeConfig::builder("bot")
        .exit_on_login_failure(false)
        .reconnect_delay(Duration::ZERO)
        .build()
}

impl Harness {
    /// Next connection's peer, with its presence frame already consumed.
    pub async fn next_peer(&mut self) -> MemoryPeer {
        let mut peer = within(self.peers.recv()).await.expect("no connection made");
        let presence = within(peer.next_json()).await.expect("no presence frame");
        assert_eq!(presence["type"], "presence");
        peer
    }

    /// Start listening and return the first connection's peer once open.
    pub async fn open(&mut self) -> MemoryPeer {
        self.client.start_listening(None).await;
        self.next_peer().await
    }
}

/// Await `fut` for at most two seconds.
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}

pub async fn wait_for_state(client: &BridgeClient, wanted: SessionState) {
    let mut rx = client.subscribe_state();
    within(async {
        while *rx.borrow_and_update() != wanted {
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Echo of a message frame the session wrote, as the server would send it.
pub fn echo_of(frame: &Value, message_id: &str) -> Value {
    let mut echo = json!({
        "type": frame["type"],
        "text": frame["text"],
        "username": "bot",
        "messageID": message_id,
        "selfSend": true,
    });
    if let Some(id) = frame.get("correlationId") {
        echo["correlationId"] = id.clone();
    }
    echo
}

/// Legacy backend double that supports a fixed set of methods and records
/// every call.
pub struct RecordingProvider {
    pub supported: Vec<&'static str>,
    pub reply: Value,
    pub calls: Mutex<Vec<(String, Args)>>,
    pub listeners: Mutex<usize>,
    pub properties: Vec<(&'static str, Value)>,
}

impl RecordingProvider {
    pub fn new(supported: &[&'static str], reply: Value) -> Self {
        Self {
            supported: supported.to_vec(),
            reply,
            calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(0),
            properties: Vec::new(),
        }
    }

    pub fn calls(&self) -> Vec<(String, Args)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityProvider for RecordingProvider {
    fn name(&self) -> &str {
        "legacy"
    }

    fn supports(&self, method: &str) -> bool {
        self.supported.contains(&method)
    }

    async fn invoke(&self, method: &str, args: Args) -> Result<Value> {
        self.calls.lock().unwrap().push((method.to_string(), args));
        Ok(self.reply.clone())
    }

    async fn listen(&self, _handler: MessageHandler) -> Result<()> {
        *self.listeners.lock().unwrap() += 1;
        Ok(())
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }
}
