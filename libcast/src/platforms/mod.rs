//! Platform adapters
//!
//! Every platform exposes a different REST and OAuth surface. The
//! [`PlatformAdapter`] trait maps each one onto a single contract so the
//! lifecycle manager and the publish state machine never branch on the
//! platform.
//!
//! The three publish protocols show up in [`JobHandle`]:
//!
//! - Instagram registers a container that must be polled and then published
//!   ([`JobHandle::Container`]).
//! - YouTube uploads in one go and returns the finished video
//!   ([`JobHandle::Immediate`]).
//! - TikTok drops the video into the creator's inbox
//!   ([`JobHandle::InboxTicket`]); the user finishes posting in the app.
//!
//! # Examples
//!
//! ```no_run
//! use libcast::platforms::{PlatformAdapter, youtube::YouTubeAdapter};
//! use libcast::config::YouTubeConfig;
//!
//! # async fn example(access_token: &str) -> libcast::Result<()> {
//! let client = libcast::platforms::http::build_client()?;
//! let adapter = YouTubeAdapter::new(YouTubeConfig::default(), client);
//!
//! let summary = adapter.account_summary(access_token).await?;
//! println!("Connected channel: {}", summary.display_name);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::error::{PublishError, RemoteError, Result};
use crate::publish::CompletionKind;
use crate::transform::TransformedVariant;
use crate::types::{AccountSummary, ContentType, Platform, PlatformCredential};

pub mod http;
pub mod instagram;
pub mod tiktok;
pub mod youtube;

// Available outside tests so integration tests and embedders can script platforms
pub mod mock;

/// What `create_publish_job` registered on the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobHandle {
    /// Remote container that is processed asynchronously
    Container {
        container_id: String,
        /// Account that owns the container, needed to publish it
        account_id: String,
    },
    /// The platform finished everything in the create call
    Immediate(PublishReceipt),
    /// Accepted into an inbox; the user completes the post on the platform
    InboxTicket { publish_id: String },
}

impl JobHandle {
    /// Remote identifier to record on the job
    pub fn remote_id(&self) -> &str {
        match self {
            JobHandle::Container { container_id, .. } => container_id,
            JobHandle::Immediate(receipt) => &receipt.remote_id,
            JobHandle::InboxTicket { publish_id } => publish_id,
        }
    }
}

/// Processing status reported while a container is polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    InProgress,
    Finished,
    Failed(RemoteError),
}

/// Outcome of a completed publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub remote_id: String,
    pub permalink: Option<String>,
    pub completion_kind: CompletionKind,
}

/// Parameters of the interactive authorization flow
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub redirect_uri: String,
}

/// Uniform contract over a platform's OAuth and publish endpoints
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Permissions requested during `connect`
    fn required_scopes(&self) -> Vec<String>;

    /// Start of `connect`: where to send the user to authorize
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the app/client id is missing.
    fn authorization_request(&self, state: &str) -> Result<AuthorizationRequest>;

    /// Whether tokens from the authorization flow must be elevated before use
    fn requires_elevation(&self) -> bool {
        false
    }

    /// Identity and profile of the account the token belongs to
    async fn account_summary(&self, access_token: &str) -> Result<AccountSummary>;

    /// Check the credential against the platform
    ///
    /// # Errors
    ///
    /// A rejected token comes back as an error for which
    /// [`CastError::is_auth_rejection`](crate::error::CastError::is_auth_rejection)
    /// is true. Transport failures are reported as network errors.
    async fn validate(&self, credential: &PlatformCredential) -> Result<()> {
        self.account_summary(&credential.access_token).await.map(|_| ())
    }

    /// Register a ready variant as remote content
    async fn create_publish_job(
        &self,
        credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        content_type: ContentType,
    ) -> Result<JobHandle>;

    /// Poll a container created by `create_publish_job`
    async fn poll_job(
        &self,
        _credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<RemoteStatus> {
        Err(PublishError::Unsupported(format!(
            "{} has no asynchronous processing step (handle {})",
            self.platform(),
            handle.remote_id()
        ))
        .into())
    }

    /// Publish a finished container
    async fn finalize(
        &self,
        _credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<PublishReceipt> {
        Err(PublishError::Unsupported(format!(
            "{} cannot finalize handle {}",
            self.platform(),
            handle.remote_id()
        ))
        .into())
    }

    /// Revoke the credential on the platform side
    async fn disconnect(&self, credential: &PlatformCredential) -> Result<()>;
}

/// Adapters keyed by platform
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned().ok_or_else(|| {
            crate::error::CastError::InvalidInput(format!("No adapter registered for {}", platform))
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;

    #[test]
    fn test_registry_lookup() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(MockAdapter::container(Platform::Instagram, vec![])))
            .with(Arc::new(MockAdapter::single_shot(Platform::YouTube)));

        assert_eq!(registry.platforms(), vec![Platform::Instagram, Platform::YouTube]);
        assert!(registry.get(Platform::YouTube).is_ok());
        assert!(registry.get(Platform::TikTok).is_err());
    }

    #[test]
    fn test_job_handle_remote_id() {
        let container = JobHandle::Container {
            container_id: "1789".to_string(),
            account_id: "1784".to_string(),
        };
        assert_eq!(container.remote_id(), "1789");

        let inbox = JobHandle::InboxTicket {
            publish_id: "v_inbox_file~v2.123".to_string(),
        };
        assert_eq!(inbox.remote_id(), "v_inbox_file~v2.123");
    }

    #[tokio::test]
    async fn test_poll_on_single_shot_is_unsupported() {
        let adapter = MockAdapter::single_shot(Platform::YouTube);
        let handle = JobHandle::InboxTicket {
            publish_id: "x".to_string(),
        };
        let credential = crate::platforms::mock::connected_credential(Platform::YouTube);
        let err = adapter.poll_job(&credential, &handle).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::CastError::Publish(PublishError::Unsupported(_))
        ));
    }
}
