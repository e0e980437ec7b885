//! Layers the bridge adapter over a legacy backend and a no-op fallback.
//!
//! A capability request resolves against an ordered provider list: the
//! adapter first (including methods assigned onto it at runtime), then the
//! legacy backend, then [`NoopProvider`], which logs and does nothing. The
//! composite therefore answers every method name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::adapter::api::{BridgeApi, MessageHandler, Property};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::llc::client::BridgeClient;

/// Positional arguments of a dynamic capability call.
pub type Args = Vec<Value>;

/// Framework method names.
pub mod methods {
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const EDIT_MESSAGE: &str = "editMessage";
    pub const LISTEN: &str = "listen";
    pub const LISTEN_MQTT: &str = "listenMqtt";
    pub const GET_THREAD_INFO: &str = "getThreadInfo";
    pub const GET_APP_STATE: &str = "getAppState";
}

/// Anything that can answer framework method calls by name.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn supports(&self, method: &str) -> bool;

    async fn invoke(&self, method: &str, args: Args) -> Result<Value>;

    /// Start delivering inbound messages to `handler`.
    async fn listen(&self, _handler: MessageHandler) -> Result<()> {
        Err(BridgeError::Unsupported(format!("{}.listen", self.name())))
    }

    /// A non-callable property, if this provider has one by that name.
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Answers everything by logging a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvider;

#[async_trait]
impl CapabilityProvider for NoopProvider {
    fn name(&self) -> &str {
        "noop"
    }

    fn supports(&self, _method: &str) -> bool {
        true
    }

    async fn invoke(&self, method: &str, args: Args) -> Result<Value> {
        let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
        warn!("api.{method}({}) has no effect!", rendered.join(", "));
        Ok(Value::Null)
    }

    async fn listen(&self, _handler: MessageHandler) -> Result<()> {
        warn!("api.listen(<handler>) has no effect!");
        Ok(())
    }
}

/// The composite API handed to the framework.
pub struct ComposedApi {
    adapter: Arc<BridgeApi>,
    fallback: NoopProvider,
}

impl ComposedApi {
    pub fn new(adapter: Arc<BridgeApi>) -> Self {
        Self {
            adapter,
            fallback: NoopProvider,
        }
    }

    /// Typed access to the adapter.
    pub fn adapter(&self) -> &Arc<BridgeApi> {
        &self.adapter
    }

    pub fn client(&self) -> &Arc<BridgeClient> {
        self.adapter.client()
    }

    fn layers(&self) -> impl Iterator<Item = &dyn CapabilityProvider> {
        let adapter: &dyn CapabilityProvider = self.adapter.as_ref();
        let legacy: Option<&dyn CapabilityProvider> = self
            .adapter
            .legacy()
            .map(|l| l.as_ref() as &dyn CapabilityProvider);
        let fallback: &dyn CapabilityProvider = &self.fallback;
        std::iter::once(adapter)
            .chain(legacy)
            .chain(std::iter::once(fallback))
    }

    /// The provider that answers `method`.
    pub fn resolve(&self, method: &str) -> &dyn CapabilityProvider {
        self.layers()
            .find(|p| p.supports(method))
            .unwrap_or(&self.fallback)
    }

    /// Call `method` on the first provider that has it.
    pub async fn call(&self, method: &str, args: Args) -> Result<Value> {
        let provider = self.resolve(method);
        tracing::trace!(method, provider = provider.name(), "dispatching");
        provider.invoke(method, args).await
    }

    pub async fn listen(&self, handler: MessageHandler) -> Result<()> {
        self.resolve(methods::LISTEN)
            .listen(handler)
            .await
    }

    /// Install `property` on the adapter layer.
    pub fn assign(&self, name: &str, property: Property) {
        self.adapter.assign(name, property);
    }

    /// First non-callable property named `name`, adapter before legacy.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.layers().find_map(|p| p.property(name))
    }
}

/// Produces the legacy backend's API.
#[async_trait]
pub trait LegacyLogin: Send + Sync {
    async fn login(&self) -> Result<Arc<dyn CapabilityProvider>>;
}

/// Result of [`login`]: the legacy login's error, if any, and the composite.
pub struct LoginOutcome {
    pub legacy_error: Option<BridgeError>,
    pub api: ComposedApi,
}

/// Log in to the legacy backend (when given) and wrap it with the bridge.
///
/// A failed legacy login is reported in the outcome; the composite still
/// works for bridge addresses.
pub async fn login(config: BridgeConfig, legacy: Option<&dyn LegacyLogin>) -> Result<LoginOutcome> {
    if config.username.is_empty() {
        return Err(BridgeError::Config("username is required".into()));
    }
    Ok(login_with(BridgeClient::new(config), legacy).await)
}

/// [`login`] over an already-built session.
pub async fn login_with(client: Arc<BridgeClient>, legacy: Option<&dyn LegacyLogin>) -> LoginOutcome {
    let (legacy_api, legacy_error) = match legacy {
        None => (None, None),
        Some(l) => match l.login().await {
            Ok(api) => {
                info!(provider = api.name(), "legacy login succeeded");
                (Some(api), None)
            }
            Err(e) => {
                warn!(error = %e, "legacy login failed");
                (None, Some(e))
            }
        },
    };
    let adapter = Arc::new(BridgeApi::new(client, legacy_api));
    LoginOutcome {
        legacy_error,
        api: ComposedApi::new(adapter),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
