//! The socket session: authenticate, connect, pump events, reconnect.
//!
//! ## Lifecycle
//! `Disconnected → Authenticating → Connecting → Open → Closed`, then back to
//! `Connecting` when a `ws_close` handler is registered, else `Disconnected`.
//! Failures while authenticating or connecting are logged and end the
//! attempt; the caller decides whether to call [`BridgeClient::start_listening`]
//! again. Socket errors while open are logged only.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::correlator::Correlator;
use super::endpoint::{add_command_request, delete_command_request, HttpEndpoint, RemoteEndpoint};
use super::protocol::{
    kinds, CommandAction, CommandSpec, CommandsRequest, InboundEvent, OutboundFrame, ReplyTarget,
    SlashCommandRequest,
};
use super::router::{EventHandler, EventRouter, Routed};
use super::transport::{Connection, Connector, Outgoing, TransportEvent, WsConnector};
use crate::config::{BridgeConfig, CorrelationMode};
use crate::error::{BridgeError, Result};

/// Upper bound on the random delay added to each reconnect.
const RECONNECT_JITTER_MS: u64 = 250;

/// Where the session is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected   => "disconnected",
            SessionState::Authenticating => "authenticating",
            SessionState::Connecting     => "connecting",
            SessionState::Open           => "open",
            SessionState::Closed         => "closed",
        };
        write!(f, "{s}")
    }
}

/// Why one connection's event pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Closed,
    Fatal,
    Stopped,
}

/// One identity's connection to the LLC socket.
pub struct BridgeClient {
    config: BridgeConfig,
    endpoint: Arc<dyn RemoteEndpoint>,
    connector: Arc<dyn Connector>,
    router: EventRouter,
    token: RwLock<Option<String>>,
    link: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    state: watch::Sender<SessionState>,
    stop: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Session over HTTP and real WebSockets.
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let endpoint = Arc::new(HttpEndpoint::new(&config));
        Self::with_parts(config, endpoint, Arc::new(WsConnector))
    }

    /// Session over caller-supplied endpoint and transport.
    pub fn with_parts(
        config: BridgeConfig,
        endpoint: Arc<dyn RemoteEndpoint>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let router = EventRouter::new(Correlator::new(config.correlation));
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            token: RwLock::new(config.token.clone()),
            config,
            endpoint,
            connector,
            router,
            link: Mutex::new(None),
            state,
            stop,
            supervisor: Mutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshot of the last `online_users` list the server sent.
    pub fn online_users(&self) -> Vec<String> {
        self.router.online_users()
    }

    /// Sends still waiting for their echo.
    pub fn pending_sends(&self) -> usize {
        self.router.correlator().pending()
    }

    /// True iff a connection exists and is open.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Open
            && self.link.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Register `handler` for each of `kinds`. Includes the `ws_open` and
    /// `ws_close` pseudo-types.
    pub fn on(&self, kinds: &[&str], handler: EventHandler) {
        self.router.on(kinds, handler);
    }

    /// Replace the generic callback without reconnecting.
    pub fn on_event(&self, callback: EventHandler) {
        self.router.set_generic(Some(callback));
    }

    pub fn set_base_url(&self, url: &str) {
        self.endpoint.set_base_url(url);
        info!(url, "base URL set");
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(username = %self.config.username, from = %prev, to = %next, "session state");
        }
    }

    // -----------------------------------------------------------------------
    // Connect cycle
    // -----------------------------------------------------------------------

    /// The held token, requesting one first if none is held.
    pub async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.token() {
            return Ok(token);
        }
        info!(username = %self.config.username, "getting token");
        let token = self
            .endpoint
            .request_access_token(&self.config.username)
            .await?;
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.clone());
        }
        Ok(token)
    }

    /// Authenticate, connect and start pumping events in the background.
    ///
    /// `callback` becomes the generic callback for every event no echo slot
    /// claims; `None` installs nothing. Failures are logged and the call
    /// returns without a connection.
    pub async fn start_listening(self: &Arc<Self>, callback: Option<EventHandler>) {
        info!(username = %self.config.username, "listening started");
        self.stop.send_replace(false);
        self.router.set_generic(callback);

        let Some(conn) = self.establish().await else {
            self.set_state(SessionState::Disconnected);
            return;
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.supervise(conn).await });
        if let Ok(mut slot) = self.supervisor.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    /// Close the socket deliberately. No reconnection follows.
    pub fn end_listening(&self) {
        info!(username = %self.config.username, "listening ended");
        self.stop.send_replace(true);
    }

    async fn establish(&self) -> Option<Connection> {
        if self.token().is_none() {
            self.set_state(SessionState::Authenticating);
        }
        if let Err(e) = self.ensure_token().await {
            warn!(username = %self.config.username, error = %e, "failed getting token");
            return None;
        }

        self.set_state(SessionState::Connecting);
        let url = if self.config.local {
            self.config.local_ws_url()
        } else {
            match self.endpoint.ws_url().await {
                Ok(url) => url,
                Err(e) => {
                    error!(error = %e, "could not resolve socket url");
                    return None;
                }
            }
        };

        match self.connector.connect(&url).await {
            Ok(conn) => {
                info!(url = %url, username = %self.config.username, "connected");
                Some(conn)
            }
            Err(e) => {
                error!(url = %url, error = %e, "socket connect failed");
                None
            }
        }
    }

    async fn supervise(self: Arc<Self>, mut conn: Connection) {
        loop {
            let end = self.pump(conn).await;
            if let Ok(mut link) = self.link.lock() {
                *link = None;
            }
            self.set_state(SessionState::Closed);
            let abandoned = self.router.correlator().abandon_all();
            if abandoned > 0 {
                warn!(abandoned, "connection closed with sends awaiting echo");
            }

            match end {
                PumpEnd::Fatal => {
                    error!(username = %self.config.username, "failed to login");
                    if self.config.exit_on_login_failure {
                        std::process::exit(1);
                    }
                    self.set_state(SessionState::Disconnected);
                    return;
                }
                PumpEnd::Stopped => {
                    self.set_state(SessionState::Disconnected);
                    return;
                }
                PumpEnd::Closed => {}
            }

            let Some(on_close) = self.router.handler(kinds::WS_CLOSE) else {
                info!(username = %self.config.username, "socket closed");
                self.set_state(SessionState::Disconnected);
                return;
            };
            on_close(lifecycle_event(kinds::WS_CLOSE)).await;
            if *self.stop.borrow() {
                self.set_state(SessionState::Disconnected);
                return;
            }

            tokio::time::sleep(self.reconnect_delay()).await;
            info!(username = %self.config.username, "reconnecting");
            match self.establish().await {
                Some(next) => conn = next,
                None => {
                    self.set_state(SessionState::Disconnected);
                    return;
                }
            }
        }
    }

    fn reconnect_delay(&self) -> Duration {
        let base = self.config.reconnect_delay;
        if base.is_zero() {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..RECONNECT_JITTER_MS))
    }

    async fn pump(&self, conn: Connection) -> PumpEnd {
        let Connection {
            outbound,
            mut inbound,
        } = conn;
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            let _ = outbound.send(Outgoing::Close);
            return PumpEnd::Stopped;
        }

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        let _ = outbound.send(Outgoing::Close);
                        return PumpEnd::Stopped;
                    }
                }
                event = inbound.next() => match event {
                    Some(TransportEvent::Open) => {
                        if let Ok(mut link) = self.link.lock() {
                            *link = Some(outbound.clone());
                        }
                        self.set_state(SessionState::Open);
                        if let Some(on_open) = self.router.handler(kinds::WS_OPEN) {
                            tokio::spawn(on_open(lifecycle_event(kinds::WS_OPEN)));
                        }
                        if let Err(e) = self.send(&OutboundFrame::Presence) {
                            warn!(error = %e, "presence frame not sent");
                        }
                    }
                    Some(TransportEvent::Frame(raw)) => {
                        if self.router.route(&raw) == Routed::Fatal {
                            let _ = outbound.send(Outgoing::Close);
                            return PumpEnd::Fatal;
                        }
                    }
                    Some(TransportEvent::Error(detail)) => {
                        error!(error = %detail, "websocket error");
                    }
                    Some(TransportEvent::Closed) | None => return PumpEnd::Closed,
                },
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Write one frame with the current token. Fails with
    /// [`BridgeError::NotReady`] unless the socket is open.
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        self.write(frame, None)
    }

    fn write(&self, frame: &OutboundFrame, correlation_id: Option<&str>) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(BridgeError::NotReady);
        }
        let link = self
            .link
            .lock()
            .ok()
            .and_then(|l| l.clone())
            .ok_or(BridgeError::NotReady)?;
        let text = frame.encode(self.token().as_deref(), correlation_id)?;
        debug!(kind = frame.kind(), "sending frame");
        link.send(Outgoing::Frame(text))
            .map_err(|_| BridgeError::NotReady)
    }

    /// Send a chat message and wait for the server's echo of it.
    ///
    /// The frame is `message_reply` when `reply_to` is given, else
    /// `message`. Resolves with the echo event; fails with `NotReady` before
    /// any I/O when the socket is not open, with `ConnectionClosed` if the
    /// connection drops first, or with `EchoTimeout` when a bound is
    /// configured and exceeded.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        reply_to: Option<ReplyTarget>,
        is_bot: bool,
    ) -> Result<InboundEvent> {
        let frame = OutboundFrame::message(text, reply_to, is_bot);
        let correlator = self.router.correlator();
        let slot = correlator.register();
        let id = slot.id().to_string();
        let stamp = match correlator.mode() {
            CorrelationMode::Keyed => Some(id.as_str()),
            CorrelationMode::Lifo => None,
        };

        if let Err(e) = self.write(&frame, stamp) {
            correlator.cancel(&id);
            return Err(e);
        }

        match slot.wait(self.config.echo_timeout).await {
            Err(BridgeError::EchoTimeout(limit)) => {
                correlator.cancel(&id);
                Err(BridgeError::EchoTimeout(limit))
            }
            other => other,
        }
    }

    /// Answer `event` with a `message_reply` quoting it, as a bot.
    pub async fn reply(&self, event: &InboundEvent, text: impl Into<String>) -> Result<InboundEvent> {
        self.send_message(text, Some(ReplyTarget::event(event)), true)
            .await
    }

    /// Replace the text of a sent message. Fire-and-forget.
    pub fn edit_message(&self, text: impl Into<String>, message_id: impl Into<String>) -> Result<()> {
        self.send(&OutboundFrame::MessageEdit {
            text: text.into(),
            message_id: message_id.into(),
        })
    }

    /// Type `text` out one character at a time.
    ///
    /// Sends an empty message, then after each `interval` (default from
    /// config) edits it to one more character. Returns the initial send's
    /// echo once the last edit is written.
    pub async fn animate(
        &self,
        text: &str,
        interval: Option<Duration>,
        reply_to: Option<ReplyTarget>,
    ) -> Result<InboundEvent> {
        let interval = interval.unwrap_or(self.config.animate_interval);
        let info = self.send_message("", reply_to, false).await?;
        let message_id = info.message_id.clone().unwrap_or_default();

        let mut shown = String::with_capacity(text.len());
        for ch in text.chars() {
            tokio::time::sleep(interval).await;
            shown.push(ch);
            self.edit_message(shown.as_str(), message_id.as_str())?;
        }
        Ok(info)
    }

    /// Ask the server whether a command name is known.
    pub fn send_command_check(&self, command_name: impl Into<String>) -> Result<()> {
        self.send(&OutboundFrame::CommandCheck {
            command_name: command_name.into(),
        })
    }

    // -----------------------------------------------------------------------
    // Command registry (HTTP)
    // -----------------------------------------------------------------------

    async fn update_commands(&self, request: CommandsRequest) -> Result<String> {
        let token = self.ensure_token().await?;
        let message = self.endpoint.update_commands(&token, &request).await?;
        info!(action = ?request.action, response = %message, "command registry updated");
        Ok(message)
    }

    pub async fn add_commands(&self, prefix: &str, commands: Vec<CommandSpec>) -> Result<String> {
        self.update_commands(CommandsRequest {
            action: CommandAction::Add,
            commands,
            prefix: prefix.to_string(),
        })
        .await
    }

    pub async fn add_command(&self, prefix: &str, name: &str, description: &str) -> Result<String> {
        self.update_commands(add_command_request(prefix, name, description))
            .await
    }

    pub async fn delete_command(&self, prefix: &str, name: &str) -> Result<String> {
        self.update_commands(delete_command_request(prefix, name))
            .await
    }

    /// Registered command prefixes; an empty list when the request fails.
    pub async fn command_prefixes(&self) -> serde_json::Value {
        match self.endpoint.command_prefixes().await {
            Ok(prefixes) => prefixes,
            Err(e) => {
                error!(error = %e, "failed to get command prefixes");
                serde_json::Value::Array(Vec::new())
            }
        }
    }

    pub async fn send_slash_command(&self, command: &str, args: Vec<String>) -> Result<String> {
        let token = self.ensure_token().await?;
        let request = SlashCommandRequest {
            command: command.to_string(),
            args,
        };
        let message = self.endpoint.send_slash_command(&token, &request).await?;
        info!(command, response = %message, "slash command sent");
        Ok(message)
    }
}

fn lifecycle_event(kind: &str) -> InboundEvent {
    InboundEvent {
        kind: kind.to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
