//! Trusted token intermediary
//!
//! Anything that needs a client secret (code exchange, Instagram long-lived
//! token elevation, refresh, TikTok revocation) goes through a backend the
//! user controls. The client never talks to those endpoints of the platform
//! directly.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::error::{CastError, CredentialError, RemoteError, Result};
use crate::platforms::http;
use crate::types::Platform;

/// Long-lived Instagram tokens last 60 days when the backend omits `expires_in`
pub const INSTAGRAM_LONG_LIVED_SECS: u64 = 60 * 24 * 60 * 60;

/// Tokens handed out by the broker
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scopes: BTreeSet<String>,
    /// Remote account id when the exchange reveals it (TikTok `open_id`)
    pub account_id: Option<String>,
    /// Already long-lived, no elevation needed
    pub long_lived: bool,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .field("account_id", &self.account_id)
            .field("long_lived", &self.long_lived)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RawGrant {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default, alias = "open_id", alias = "user_id")]
    account_id: Option<String>,
    #[serde(default)]
    long_lived: bool,
}

impl From<RawGrant> for TokenGrant {
    fn from(raw: RawGrant) -> Self {
        let mut scopes: BTreeSet<String> = raw.scopes.unwrap_or_default().into_iter().collect();
        if let Some(scope) = raw.scope {
            scopes.extend(
                scope
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        TokenGrant {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
            scopes,
            account_id: raw.account_id,
            long_lived: raw.long_lived,
        }
    }
}

impl TokenGrant {
    /// Read a grant out of an authorization payload or a broker response
    pub fn from_value(platform: Platform, value: &Value) -> Result<Self> {
        serde_json::from_value::<RawGrant>(value.clone())
            .map(TokenGrant::from)
            .map_err(|e| {
                RemoteError::new(platform, format!("Malformed token payload: {}", e))
                    .with_body(value.to_string())
                    .into()
            })
    }
}

#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, platform: Platform, code: &str, redirect_uri: &str)
        -> Result<TokenGrant>;

    /// Fetch tokens for a server-side session identified by `user_id`
    async fn session(&self, platform: Platform, user_id: &str) -> Result<TokenGrant>;

    /// Trade a short-lived Instagram token for a long-lived one
    async fn elevate(&self, short_lived_token: &str) -> Result<TokenGrant>;

    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<TokenGrant>;

    async fn revoke(&self, platform: Platform, access_token: &str) -> Result<()>;
}

/// Broker reached over HTTP
pub struct HttpTokenBroker {
    base_url: String,
    client: Client,
}

/// `{success, data, error}` envelope used by the backend
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl HttpTokenBroker {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, platform: Platform, path: &str, body: Value) -> Result<Value> {
        tracing::debug!("Broker request {} for {}", path, platform);
        let response = self.client.post(self.endpoint(path)).json(&body).send().await?;
        let raw: Value = http::json(platform, response).await?;

        // plain grants and enveloped grants are both accepted
        if raw.get("access_token").is_some() {
            return Ok(raw);
        }
        let envelope: Envelope = serde_json::from_value(raw.clone()).map_err(|e| {
            RemoteError::new(platform, format!("Unexpected broker response: {}", e))
                .with_body(raw.to_string())
        })?;
        if !envelope.success {
            return Err(RemoteError::new(
                platform,
                envelope
                    .error
                    .unwrap_or_else(|| "broker reported failure".to_string()),
            )
            .with_body(raw.to_string())
            .into());
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn grant(&self, platform: Platform, path: &str, body: Value) -> Result<TokenGrant> {
        let data = self.post(platform, path, body).await?;
        TokenGrant::from_value(platform, &data)
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let path = format!("/api/{}/exchange", platform);
        self.grant(
            platform,
            &path,
            json!({ "code": code, "redirect_uri": redirect_uri }),
        )
        .await
    }

    async fn session(&self, platform: Platform, user_id: &str) -> Result<TokenGrant> {
        let path = format!("/api/{}/session", platform);
        self.grant(platform, &path, json!({ "user_id": user_id })).await
    }

    async fn elevate(&self, short_lived_token: &str) -> Result<TokenGrant> {
        let result = self
            .grant(
                Platform::Instagram,
                "/api/instagram/graph/long-lived-token",
                json!({ "access_token": short_lived_token }),
            )
            .await;

        match result {
            Ok(mut grant) => {
                grant.long_lived = true;
                grant.expires_in.get_or_insert(INSTAGRAM_LONG_LIVED_SECS);
                Ok(grant)
            }
            Err(CastError::Remote(remote)) => {
                Err(CredentialError::ElevationFailed(remote.to_string()).into())
            }
            Err(other) => Err(other),
        }
    }

    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<TokenGrant> {
        let path = format!("/api/{}/refresh", platform);
        self.grant(platform, &path, json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn revoke(&self, platform: Platform, access_token: &str) -> Result<()> {
        let path = format!("/api/{}/logout", platform);
        self.post(platform, &path, json!({ "access_token": access_token }))
            .await?;
        Ok(())
    }
}

/// In-memory broker for tests
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        exchanges: Vec<(Platform, String)>,
        sessions: Vec<(Platform, String)>,
        elevations: Vec<String>,
        refreshes: Vec<(Platform, String)>,
        revocations: Vec<(Platform, String)>,
    }

    /// Hands out predictable tokens: `exchanged-<code>`, `long-<token>`,
    /// `refreshed-<n>`, `session-<user>`
    #[derive(Default)]
    pub struct MockBroker {
        calls: Mutex<Calls>,
        reject_elevation: Mutex<bool>,
        reject_refresh: Mutex<bool>,
        exchange_delay: Mutex<Option<Duration>>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reject_elevation(&self) {
            *self.reject_elevation.lock().unwrap_or_else(|p| p.into_inner()) = true;
        }

        pub fn reject_refresh(&self) {
            *self.reject_refresh.lock().unwrap_or_else(|p| p.into_inner()) = true;
        }

        /// Make every code exchange take `delay`
        pub fn delay_exchange(&self, delay: Duration) {
            *self.exchange_delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
        }

        fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner())
        }

        pub fn exchange_count(&self) -> usize {
            self.calls().exchanges.len()
        }

        pub fn session_count(&self) -> usize {
            self.calls().sessions.len()
        }

        pub fn elevation_count(&self) -> usize {
            self.calls().elevations.len()
        }

        pub fn refresh_count(&self) -> usize {
            self.calls().refreshes.len()
        }

        pub fn revoked(&self) -> Vec<(Platform, String)> {
            self.calls().revocations.clone()
        }

        fn grant(access_token: String, refresh_token: Option<String>) -> TokenGrant {
            TokenGrant {
                access_token,
                refresh_token,
                expires_in: Some(3600),
                scopes: BTreeSet::new(),
                account_id: None,
                long_lived: false,
            }
        }
    }

    #[async_trait]
    impl TokenBroker for MockBroker {
        async fn exchange_code(
            &self,
            platform: Platform,
            code: &str,
            _redirect_uri: &str,
        ) -> Result<TokenGrant> {
            self.calls().exchanges.push((platform, code.to_string()));
            let delay = *self.exchange_delay.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Self::grant(
                format!("exchanged-{}", code),
                Some(format!("refresh-{}", code)),
            ))
        }

        async fn session(&self, platform: Platform, user_id: &str) -> Result<TokenGrant> {
            self.calls().sessions.push((platform, user_id.to_string()));
            let mut grant = Self::grant(format!("session-{}", user_id), None);
            grant.account_id = Some(user_id.to_string());
            Ok(grant)
        }

        async fn elevate(&self, short_lived_token: &str) -> Result<TokenGrant> {
            self.calls().elevations.push(short_lived_token.to_string());
            if *self.reject_elevation.lock().unwrap_or_else(|p| p.into_inner()) {
                return Err(CredentialError::ElevationFailed(
                    "Invalid OAuth access token".to_string(),
                )
                .into());
            }
            let mut grant = Self::grant(format!("long-{}", short_lived_token), None);
            grant.expires_in = Some(INSTAGRAM_LONG_LIVED_SECS);
            grant.long_lived = true;
            Ok(grant)
        }

        async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<TokenGrant> {
            let count = {
                let mut calls = self.calls();
                calls.refreshes.push((platform, refresh_token.to_string()));
                calls.refreshes.len()
            };
            if *self.reject_refresh.lock().unwrap_or_else(|p| p.into_inner()) {
                return Err(RemoteError::new(platform, "invalid_grant")
                    .with_status(401)
                    .into());
            }
            Ok(Self::grant(format!("refreshed-{}", count), None))
        }

        async fn revoke(&self, platform: Platform, access_token: &str) -> Result<()> {
            self.calls()
                .revocations
                .push((platform, access_token.to_string()));
            Ok(())
        }
    }
}
