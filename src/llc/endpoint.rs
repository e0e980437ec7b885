//! HTTP side of the LLC service: token exchange, socket URL discovery and
//! the command registry.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::protocol::{
    ApiMessage, CommandAction, CommandSpec, CommandsRequest, SlashCommandRequest, TokenResponse,
    WsUrlResponse,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// The HTTP operations a session needs from the service.
///
/// Only the token exchange and socket URL lookup are required; the command
/// registry defaults to [`BridgeError::Unsupported`].
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Exchange `username` for a session token. One request, no retry.
    async fn request_access_token(&self, username: &str) -> Result<String>;

    /// Socket URL the service currently advertises.
    async fn ws_url(&self) -> Result<String>;

    fn base_url(&self) -> String {
        String::new()
    }

    fn set_base_url(&self, _url: &str) {}

    async fn update_commands(&self, _token: &str, _request: &CommandsRequest) -> Result<String> {
        Err(BridgeError::Unsupported("update_commands".into()))
    }

    async fn command_prefixes(&self) -> Result<serde_json::Value> {
        Err(BridgeError::Unsupported("command_prefixes".into()))
    }

    async fn send_slash_command(
        &self,
        _token: &str,
        _request: &SlashCommandRequest,
    ) -> Result<String> {
        Err(BridgeError::Unsupported("send_slash_command".into()))
    }
}

/// Interpret a token response: `fail` carries the server's reason,
/// `success` carries the token.
pub fn interpret_token_response(username: &str, response: TokenResponse) -> Result<String> {
    match response.kind.as_deref() {
        Some("fail") => Err(BridgeError::Authentication(
            response.message.unwrap_or_else(|| "token request failed".into()),
        )),
        Some("success") => match response.token {
            Some(token) => {
                info!(username, "obtained access token");
                Ok(token)
            }
            None => Err(BridgeError::Authentication(
                "success response without a token".into(),
            )),
        },
        other => Err(BridgeError::Authentication(format!(
            "unexpected token response type {other:?}"
        ))),
    }
}

/// Build the body of a single-command add, as the registry expects it.
pub fn add_command_request(prefix: &str, name: &str, description: &str) -> CommandsRequest {
    CommandsRequest {
        action: CommandAction::Add,
        commands: vec![CommandSpec::new(name, description)],
        prefix: prefix.to_string(),
    }
}

pub fn delete_command_request(prefix: &str, name: &str) -> CommandsRequest {
    CommandsRequest {
        action: CommandAction::Delete,
        commands: vec![CommandSpec::named(name)],
        prefix: prefix.to_string(),
    }
}

/// reqwest-backed [`RemoteEndpoint`].
pub struct HttpEndpoint {
    base_url: RwLock<String>,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(config: &BridgeConfig) -> Self {
        // Client::builder() can fail in extreme environments; fall back to
        // a default client instead of panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: RwLock::new(trim_base(&config.base_url)),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, field: &str) -> Result<T> {
        let url = resp.url().to_string();
        if !resp.status().is_success() {
            return Err(BridgeError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }
        let bytes = resp.bytes().await.map_err(|e| BridgeError::Json {
            field: "body".into(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| BridgeError::Json {
            field: field.into(),
            detail: e.to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| connect_error(url, e))
    }

    async fn post<B: serde::Serialize + Sync>(&self, url: &str, body: &B) -> Result<reqwest::Response> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| connect_error(url, e))
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn connect_error(url: &str, e: reqwest::Error) -> BridgeError {
    BridgeError::Connect {
        url: url.to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    async fn request_access_token(&self, username: &str) -> Result<String> {
        info!(username, "requesting access token");
        let url = self.url("/api/request_access_token");
        let resp = self
            .client
            .get(&url)
            .query(&[("username", username)])
            .send()
            .await
            .map_err(|e| connect_error(&url, e))?;
        let body: TokenResponse = Self::read_json(resp, "token").await?;
        interpret_token_response(username, body)
    }

    async fn ws_url(&self) -> Result<String> {
        let url = self.url("/ws-url");
        let resp = self.get(&url).await?;
        let body: WsUrlResponse = Self::read_json(resp, "url").await?;
        debug!(ws_url = %body.url, "resolved socket url");
        Ok(body.url)
    }

    fn base_url(&self) -> String {
        self.base_url
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn set_base_url(&self, url: &str) {
        if let Ok(mut guard) = self.base_url.write() {
            *guard = trim_base(url);
        }
    }

    async fn update_commands(&self, token: &str, request: &CommandsRequest) -> Result<String> {
        let url = self.url(&format!("/api/commands/{token}"));
        let resp = self.post(&url, request).await?;
        let body: ApiMessage = Self::read_json(resp, "message").await?;
        Ok(body.message.unwrap_or_default())
    }

    async fn command_prefixes(&self) -> Result<serde_json::Value> {
        let url = self.url("/api/prefixes");
        let resp = self.get(&url).await?;
        Self::read_json(resp, "prefixes").await
    }

    async fn send_slash_command(&self, token: &str, request: &SlashCommandRequest) -> Result<String> {
        let url = self.url(&format!("/api/commands/{token}/slash"));
        let resp = self.post(&url, request).await?;
        let body: ApiMessage = Self::read_json(resp, "message").await?;
        Ok(body.message.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
