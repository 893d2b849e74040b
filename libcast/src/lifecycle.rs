//! Credential Lifecycle Manager
//!
//! Owns every credential transition:
//!
//! ```text
//! disconnected ──connect──► connecting ──► connected ──validate──► invalid
//!      ▲                        │              │                     │
//!      └── cancel/timeout/error ┘              │      refresh ◄──────┘
//!      └───────────────────── disconnect ──────┴─────────────────────┘
//! ```
//!
//! A connect attempt never escapes as an error: popup blocking, user
//! cancellation, timeout and provider errors all resolve to a
//! [`ConnectOutcome`] carrying a [`DisconnectReason`]. At most one attempt
//! runs per platform; concurrent callers share its outcome.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::broker::{TokenBroker, TokenGrant};
use crate::config::AuthConfig;
use crate::credentials::CredentialStore;
use crate::error::{AuthError, CastError, CredentialError, Result};
use crate::oauth::{generate_state, AuthLauncher, AuthMessage, LaunchError, WindowMessage};
use crate::platforms::{AdapterRegistry, PlatformAdapter};
use crate::service::events::{Event, EventBus};
use crate::types::{
    AccountSummary, ConnectOutcome, CredentialStatus, DisconnectReason, Platform,
    PlatformCredential,
};

type SharedConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

struct PendingConnect {
    generation: u64,
    cancel: CancellationToken,
    outcome: SharedConnect,
}

/// What to do with a message from the authorization window
enum Verdict {
    Accept(Value),
    Reject(DisconnectReason),
    Ignore,
}

pub struct CredentialLifecycleManager {
    store: CredentialStore,
    adapters: AdapterRegistry,
    broker: Arc<dyn TokenBroker>,
    launcher: Arc<dyn AuthLauncher>,
    auth: AuthConfig,
    events: EventBus,
    pending: Mutex<HashMap<Platform, PendingConnect>>,
    generation: AtomicU64,
}

impl CredentialLifecycleManager {
    pub fn new(
        store: CredentialStore,
        adapters: AdapterRegistry,
        broker: Arc<dyn TokenBroker>,
        launcher: Arc<dyn AuthLauncher>,
        auth: AuthConfig,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            adapters,
            broker,
            launcher,
            auth,
            events,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Platform, PendingConnect>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, platform: Platform, status: CredentialStatus, reason: Option<DisconnectReason>) {
        self.events.emit(Event::CredentialChanged {
            platform,
            status,
            reason,
        });
    }

    /// Current status; `Connecting` while an attempt is in flight
    pub fn status(&self, platform: Platform) -> Result<CredentialStatus> {
        if self.pending().contains_key(&platform) {
            return Ok(CredentialStatus::Connecting);
        }
        self.store.status(platform)
    }

    pub fn credential(&self, platform: Platform) -> Result<Option<PlatformCredential>> {
        self.store.load(platform)
    }

    /// Run the interactive authorization for `platform`
    ///
    /// An already connected platform resolves immediately with the stored
    /// credential. While an attempt is in flight further calls join it and
    /// observe the same outcome.
    pub async fn connect(self: &Arc<Self>, platform: Platform) -> ConnectOutcome {
        match self.store.load(platform) {
            Ok(Some(credential)) if credential.status == CredentialStatus::Connected => {
                tracing::debug!("{} is already connected", platform);
                return ConnectOutcome::connected(credential);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read stored {} credential: {}", platform, e),
        }

        let outcome = {
            let mut pending = self.pending();
            match pending.get(&platform) {
                Some(existing) => {
                    tracing::info!("Connect for {} already in progress, joining it", platform);
                    existing.outcome.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let cancel = CancellationToken::new();
                    let outcome = self.spawn_connect(platform, generation, cancel.clone());
                    pending.insert(
                        platform,
                        PendingConnect {
                            generation,
                            cancel,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Connect and turn a failed outcome into an [`AuthError`]
    pub async fn connect_credential(self: &Arc<Self>, platform: Platform) -> Result<PlatformCredential> {
        let outcome = self.connect(platform).await;
        if let Some(credential) = outcome.credential {
            return Ok(credential);
        }
        let error = match outcome.reason {
            Some(DisconnectReason::PopupBlocked) => AuthError::PopupBlocked,
            Some(DisconnectReason::TimedOut) => {
                AuthError::TimedOut(self.auth.connect_timeout.as_secs())
            }
            Some(DisconnectReason::Denied(message)) => AuthError::Provider(message),
            Some(DisconnectReason::Failed(message)) => AuthError::TokenRejected(message),
            Some(DisconnectReason::Cancelled) | None => AuthError::Cancelled,
        };
        Err(error.into())
    }

    // The attempt runs as its own task so it completes even if every caller
    // stops waiting; the pending entry is removed by the task itself.
    fn spawn_connect(
        self: &Arc<Self>,
        platform: Platform,
        generation: u64,
        cancel: CancellationToken,
    ) -> SharedConnect {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = this.run_connect(platform, &cancel).await;
            let mut pending = this.pending();
            if pending.get(&platform).map(|p| p.generation) == Some(generation) {
                pending.remove(&platform);
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                ConnectOutcome::failed(
                    platform,
                    CredentialStatus::Disconnected,
                    DisconnectReason::Failed(format!("connect task failed: {}", e)),
                )
            })
        }
        .boxed()
        .shared()
    }

    async fn run_connect(&self, platform: Platform, cancel: &CancellationToken) -> ConnectOutcome {
        // a failed attempt falls back to what was there before
        let prior = match self.store.status(platform) {
            Ok(CredentialStatus::Invalid) => CredentialStatus::Invalid,
            _ => CredentialStatus::Disconnected,
        };

        let adapter = match self.adapters.get(platform) {
            Ok(adapter) => adapter,
            Err(e) => {
                return ConnectOutcome::failed(platform, prior, DisconnectReason::Failed(e.to_string()))
            }
        };

        tracing::info!("Connecting {}", platform);
        self.emit(platform, CredentialStatus::Connecting, None);

        match self.authorize(adapter.as_ref(), cancel).await {
            Ok(credential) => {
                tracing::info!("{} connected as {}", platform, credential.display_name);
                self.emit(platform, CredentialStatus::Connected, None);
                ConnectOutcome::connected(credential)
            }
            Err(reason) => {
                tracing::warn!("Connecting {} ended: {}", platform, reason);
                self.emit(platform, prior, Some(reason.clone()));
                ConnectOutcome::failed(platform, prior, reason)
            }
        }
    }

    async fn authorize(
        &self,
        adapter: &dyn PlatformAdapter,
        cancel: &CancellationToken,
    ) -> std::result::Result<PlatformCredential, DisconnectReason> {
        let platform = adapter.platform();
        let state = generate_state();
        let request = adapter
            .authorization_request(&state)
            .map_err(|e| DisconnectReason::Failed(e.to_string()))?;

        let mut window = match self.launcher.launch(platform, &request.url).await {
            Ok(window) => window,
            Err(LaunchError::Blocked) => return Err(DisconnectReason::PopupBlocked),
            Err(LaunchError::Io(message)) => return Err(DisconnectReason::Failed(message)),
        };

        let deadline = tokio::time::sleep(self.auth.connect_timeout);
        tokio::pin!(deadline);

        let verdict = loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Verdict::Reject(DisconnectReason::Cancelled),
                _ = &mut deadline => break Verdict::Reject(DisconnectReason::TimedOut),
                message = window.messages.recv() => message,
                _ = window.closed.cancelled() => None,
            };
            match message {
                Some(message) => match self.judge(platform, &state, message) {
                    Verdict::Ignore => continue,
                    verdict => break verdict,
                },
                // window closed without an answer
                None => break Verdict::Reject(DisconnectReason::Cancelled),
            }
        };
        window.closed.cancel();

        let auth_data = match verdict {
            Verdict::Accept(data) => data,
            Verdict::Reject(reason) => return Err(reason),
            Verdict::Ignore => return Err(DisconnectReason::Cancelled),
        };

        // a disconnect during the exchange wins over the exchange
        let completion =
            self.complete_authorization(adapter, &auth_data, &request.redirect_uri, cancel);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DisconnectReason::Cancelled),
            result = completion => result,
        };
        result.map_err(|e| match e {
            CastError::Auth(AuthError::Cancelled) => DisconnectReason::Cancelled,
            other => DisconnectReason::Failed(other.to_string()),
        })
    }

    fn judge(&self, platform: Platform, state: &str, message: WindowMessage) -> Verdict {
        if !self.auth.allowed_origins.iter().any(|o| o == &message.origin) {
            tracing::warn!("{}", AuthError::OriginMismatch(message.origin));
            return Verdict::Ignore;
        }
        match AuthMessage::parse(&message.data) {
            Some(AuthMessage::Error { platform: p, error }) if p == platform => {
                Verdict::Reject(DisconnectReason::Denied(error))
            }
            Some(AuthMessage::Success {
                platform: p,
                auth_data,
            }) if p == platform => {
                // server-side completions (user_id, access_token) carry no nonce
                let echoed = auth_data.get("state").and_then(Value::as_str);
                let carries_code = auth_data.get("code").is_some();
                match echoed {
                    Some(echoed) if echoed != state => {
                        tracing::warn!("{} for {}", AuthError::StateMismatch, platform);
                        Verdict::Ignore
                    }
                    None if carries_code => {
                        tracing::warn!(
                            "{} for {}: authorization code without state",
                            AuthError::StateMismatch,
                            platform
                        );
                        Verdict::Ignore
                    }
                    _ => Verdict::Accept(auth_data),
                }
            }
            _ => {
                tracing::debug!("Ignoring unrelated window message for {}", platform);
                Verdict::Ignore
            }
        }
    }

    /// Tokens from the completion payload, then elevation, then the profile
    async fn complete_authorization(
        &self,
        adapter: &dyn PlatformAdapter,
        auth_data: &Value,
        redirect_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<PlatformCredential> {
        let platform = adapter.platform();
        let field = |name: &str| auth_data.get(name).and_then(Value::as_str);

        let mut grant = if field("access_token").is_some() {
            TokenGrant::from_value(platform, auth_data)?
        } else if let Some(code) = field("code") {
            self.broker.exchange_code(platform, code, redirect_uri).await?
        } else if let Some(user_id) = field("user_id") {
            self.broker.session(platform, user_id).await?
        } else {
            return Err(AuthError::TokenRejected(
                "completion carried no token, code or user id".to_string(),
            )
            .into());
        };

        if adapter.requires_elevation() && !grant.long_lived {
            let elevated = self.elevate(&grant.access_token).await?;
            grant.access_token = elevated.access_token;
            grant.expires_in = elevated.expires_in;
            grant.long_lived = true;
        }

        let summary = adapter.account_summary(&grant.access_token).await?;
        let credential = credential_from(platform, grant, &summary, adapter.required_scopes());
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled.into());
        }
        self.store.save(&credential)?;
        self.store.save_summary(platform, &summary)?;
        // disconnect may have cleared the platform while we were saving
        if cancel.is_cancelled() {
            self.store.clear_platform(platform)?;
            return Err(AuthError::Cancelled.into());
        }
        Ok(credential)
    }

    /// Trade a short-lived Instagram token for a long-lived one via the broker
    pub async fn elevate(&self, short_lived_token: &str) -> Result<TokenGrant> {
        tracing::debug!("Elevating short-lived Instagram token");
        self.broker.elevate(short_lived_token).await.map_err(|e| match e {
            CastError::Credential(CredentialError::ElevationFailed(_)) => e,
            other => CredentialError::ElevationFailed(other.to_string()).into(),
        })
    }

    /// Re-check the stored token against the platform
    ///
    /// A rejected or expired token marks the credential invalid and keeps
    /// everything stored. Transport failures are returned as errors and
    /// change nothing.
    pub async fn validate(&self, platform: Platform) -> Result<CredentialStatus> {
        let Some(credential) = self.store.load(platform)? else {
            return Ok(CredentialStatus::Disconnected);
        };

        if credential.is_expired() {
            tracing::info!("{} token expired", platform);
            return self.mark_invalid(platform, credential.status);
        }

        let adapter = self.adapters.get(platform)?;
        match adapter.validate(&credential).await {
            Ok(()) => {
                if credential.status != CredentialStatus::Connected {
                    self.store.set_status(platform, CredentialStatus::Connected)?;
                    self.emit(platform, CredentialStatus::Connected, None);
                }
                Ok(CredentialStatus::Connected)
            }
            Err(e) if e.is_auth_rejection() => {
                tracing::info!("{} rejected the stored token: {}", platform, e);
                self.mark_invalid(platform, credential.status)
            }
            Err(e) => Err(e),
        }
    }

    fn mark_invalid(&self, platform: Platform, previous: CredentialStatus) -> Result<CredentialStatus> {
        if previous != CredentialStatus::Invalid {
            self.store.set_status(platform, CredentialStatus::Invalid)?;
            self.emit(platform, CredentialStatus::Invalid, None);
        }
        Ok(CredentialStatus::Invalid)
    }

    /// Obtain fresh tokens for a stored credential
    ///
    /// Elevating platforms re-elevate the current long-lived token; the
    /// others use the stored refresh token.
    pub async fn refresh(&self, platform: Platform) -> Result<PlatformCredential> {
        let credential = self
            .store
            .load(platform)?
            .ok_or_else(|| CredentialError::NotFound(platform.to_string()))?;
        let adapter = self.adapters.get(platform)?;

        let result = if adapter.requires_elevation() {
            self.elevate(&credential.access_token).await
        } else if let Some(refresh_token) = &credential.refresh_token {
            self.broker.refresh(platform, refresh_token).await
        } else {
            Err(AuthError::TokenRejected(format!("{} has no refresh token", platform)).into())
        };

        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                let rejected = e.is_auth_rejection()
                    || matches!(e, CastError::Credential(CredentialError::ElevationFailed(_)));
                if rejected {
                    self.mark_invalid(platform, credential.status)?;
                }
                return Err(e);
            }
        };

        let refreshed = PlatformCredential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(credential.refresh_token),
            expires_at: expiry(grant.expires_in),
            scopes: if grant.scopes.is_empty() {
                credential.scopes
            } else {
                grant.scopes
            },
            status: CredentialStatus::Connected,
            ..credential
        };
        self.store.save(&refreshed)?;
        tracing::info!("{} token refreshed", platform);
        self.emit(platform, CredentialStatus::Connected, None);
        Ok(refreshed)
    }

    /// Validate, refreshing once when the token turns out to be invalid
    pub async fn ensure_valid(&self, platform: Platform) -> Result<PlatformCredential> {
        match self.validate(platform).await? {
            CredentialStatus::Connected => self
                .store
                .load(platform)?
                .ok_or_else(|| CredentialError::NotFound(platform.to_string()).into()),
            CredentialStatus::Invalid => self.refresh(platform).await,
            _ => Err(CredentialError::NotFound(platform.to_string()).into()),
        }
    }

    /// Revoke remotely if possible, then clear every stored key
    ///
    /// Remote revocation is best effort; the local clear always happens.
    pub async fn disconnect(&self, platform: Platform) -> Result<()> {
        if let Some(pending) = self.pending().remove(&platform) {
            tracing::info!("Cancelling in-flight connect for {}", platform);
            pending.cancel.cancel();
        }

        match (self.store.load(platform), self.adapters.get(platform)) {
            (Ok(Some(credential)), Ok(adapter)) => {
                if let Err(e) = adapter.disconnect(&credential).await {
                    tracing::warn!("Remote revocation for {} failed: {}", platform, e);
                }
            }
            (Err(e), _) => tracing::warn!("Could not read {} credential: {}", platform, e),
            _ => {}
        }

        let removed = self.store.clear_platform(platform)?;
        tracing::info!("{} disconnected ({} keys removed)", platform, removed);
        self.emit(platform, CredentialStatus::Disconnected, None);
        Ok(())
    }
}

fn expiry(expires_in: Option<u64>) -> Option<chrono::DateTime<Utc>> {
    expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .map(|secs| Utc::now() + ChronoDuration::seconds(secs))
}

fn credential_from(
    platform: Platform,
    grant: TokenGrant,
    summary: &AccountSummary,
    requested_scopes: Vec<String>,
) -> PlatformCredential {
    let account_id = if summary.account_id.is_empty() {
        grant.account_id.unwrap_or_default()
    } else {
        summary.account_id.clone()
    };
    PlatformCredential {
        platform,
        account_id,
        display_name: summary.display_name.clone(),
        expires_at: expiry(grant.expires_in),
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        scopes: if grant.scopes.is_empty() {
            requested_scopes.into_iter().collect()
        } else {
            grant.scopes
        },
        status: CredentialStatus::Connected,
    }
}
