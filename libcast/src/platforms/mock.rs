//! Scriptable adapter for tests
//!
//! The publish protocol is picked by the constructor: [`MockAdapter::container`]
//! replays a list of remote statuses, [`MockAdapter::single_shot`] finishes in
//! the create call and [`MockAdapter::inbox`] returns an inbox ticket. Every
//! call is counted so tests can assert what the orchestrator did.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use url::Url;

use super::{AuthorizationRequest, JobHandle, PlatformAdapter, PublishReceipt, RemoteStatus};
use crate::error::{CastError, RemoteError, Result};
use crate::publish::CompletionKind;
use crate::transform::TransformedVariant;
use crate::types::{AccountSummary, ContentType, CredentialStatus, Platform, PlatformCredential};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Container,
    SingleShot,
    Inbox,
}

#[derive(Default)]
struct Calls {
    creates: usize,
    polls: usize,
    finalizes: usize,
    validations: usize,
    summaries: usize,
    disconnects: usize,
    captions: Vec<String>,
}

#[derive(Default)]
struct Script {
    statuses: VecDeque<RemoteStatus>,
    create_error: Option<RemoteError>,
    finalize_error: Option<RemoteError>,
    network_error_polls: usize,
    reject_token: bool,
    disconnect_error: Option<String>,
}

pub struct MockAdapter {
    platform: Platform,
    protocol: Protocol,
    elevation: bool,
    calls: Mutex<Calls>,
    script: Mutex<Script>,
}

/// A connected credential that passes every precondition
pub fn connected_credential(platform: Platform) -> PlatformCredential {
    PlatformCredential {
        platform,
        account_id: format!("{}-account", platform),
        display_name: format!("Mock {}", platform),
        access_token: format!("{}-token", platform),
        refresh_token: None,
        expires_at: None,
        scopes: BTreeSet::new(),
        status: CredentialStatus::Connected,
    }
}

impl MockAdapter {
    fn with_protocol(platform: Platform, protocol: Protocol, statuses: Vec<RemoteStatus>) -> Self {
        Self {
            platform,
            protocol,
            elevation: false,
            calls: Mutex::new(Calls::default()),
            script: Mutex::new(Script {
                statuses: statuses.into(),
                ..Script::default()
            }),
        }
    }

    /// Container protocol; once `statuses` is drained every poll is IN_PROGRESS
    pub fn container(platform: Platform, statuses: Vec<RemoteStatus>) -> Self {
        Self::with_protocol(platform, Protocol::Container, statuses)
    }

    pub fn single_shot(platform: Platform) -> Self {
        Self::with_protocol(platform, Protocol::SingleShot, Vec::new())
    }

    pub fn inbox(platform: Platform) -> Self {
        Self::with_protocol(platform, Protocol::Inbox, Vec::new())
    }

    /// Tokens from the authorization flow must be elevated
    pub fn with_elevation(mut self) -> Self {
        self.elevation = true;
        self
    }

    pub fn fail_create(&self, error: RemoteError) {
        self.script().create_error = Some(error);
    }

    pub fn fail_finalize(&self, error: RemoteError) {
        self.script().finalize_error = Some(error);
    }

    pub fn fail_next_poll_with_network_error(&self) {
        self.script().network_error_polls += 1;
    }

    /// Every token is rejected from now on
    pub fn reject_tokens(&self) {
        self.script().reject_token = true;
    }

    pub fn accept_tokens(&self) {
        self.script().reject_token = false;
    }

    pub fn fail_disconnect(&self, message: impl Into<String>) {
        self.script().disconnect_error = Some(message.into());
    }

    pub fn create_count(&self) -> usize {
        self.calls().creates
    }

    pub fn poll_count(&self) -> usize {
        self.calls().polls
    }

    pub fn finalize_count(&self) -> usize {
        self.calls().finalizes
    }

    pub fn validate_count(&self) -> usize {
        self.calls().validations
    }

    pub fn summary_count(&self) -> usize {
        self.calls().summaries
    }

    pub fn disconnect_count(&self) -> usize {
        self.calls().disconnects
    }

    pub fn captions(&self) -> Vec<String> {
        self.calls().captions.clone()
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rejected(&self) -> RemoteError {
        RemoteError::new(self.platform, "Access token rejected").with_status(401)
    }

    fn receipt(&self, remote_id: String) -> PublishReceipt {
        PublishReceipt {
            permalink: Some(format!("https://{}.example/p/{}", self.platform, remote_id)),
            remote_id,
            completion_kind: CompletionKind::Published,
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn required_scopes(&self) -> Vec<String> {
        vec![format!("{}.publish", self.platform)]
    }

    fn authorization_request(&self, state: &str) -> Result<AuthorizationRequest> {
        let mut url = Url::parse("https://auth.mock.invalid/authorize")
            .map_err(|e| CastError::InvalidInput(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("platform", self.platform.as_str())
            .append_pair("state", state);
        Ok(AuthorizationRequest {
            url,
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
        })
    }

    fn requires_elevation(&self) -> bool {
        self.elevation
    }

    async fn account_summary(&self, access_token: &str) -> Result<AccountSummary> {
        self.calls().summaries += 1;
        if self.script().reject_token {
            return Err(self.rejected().into());
        }
        Ok(AccountSummary {
            account_id: format!("{}-account", self.platform),
            display_name: format!("Mock {}", self.platform),
            username: Some(format!("user_{}", access_token.len())),
            account_type: None,
            avatar_url: None,
            follower_count: Some(42),
        })
    }

    async fn validate(&self, _credential: &PlatformCredential) -> Result<()> {
        self.calls().validations += 1;
        if self.script().reject_token {
            return Err(self.rejected().into());
        }
        Ok(())
    }

    async fn create_publish_job(
        &self,
        _credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        _content_type: ContentType,
    ) -> Result<JobHandle> {
        let creates = {
            let mut calls = self.calls();
            calls.creates += 1;
            calls.captions.push(caption.to_string());
            calls.creates
        };
        if let Some(error) = self.script().create_error.clone() {
            return Err(error.into());
        }
        let remote_id = format!("{}-{}", self.platform, creates);
        tracing::debug!("Mock create for {} at {}", self.platform, variant.url());
        Ok(match self.protocol {
            Protocol::Container => JobHandle::Container {
                container_id: remote_id,
                account_id: format!("{}-account", self.platform),
            },
            Protocol::SingleShot => JobHandle::Immediate(self.receipt(remote_id)),
            Protocol::Inbox => JobHandle::InboxTicket {
                publish_id: remote_id,
            },
        })
    }

    async fn poll_job(
        &self,
        _credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<RemoteStatus> {
        if self.protocol != Protocol::Container {
            return Err(crate::error::PublishError::Unsupported(format!(
                "mock {} has no processing step for {}",
                self.platform,
                handle.remote_id()
            ))
            .into());
        }
        self.calls().polls += 1;
        let mut script = self.script();
        if script.network_error_polls > 0 {
            script.network_error_polls -= 1;
            return Err(CastError::Network("connection reset by peer".to_string()));
        }
        Ok(script.statuses.pop_front().unwrap_or(RemoteStatus::InProgress))
    }

    async fn finalize(
        &self,
        _credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<PublishReceipt> {
        self.calls().finalizes += 1;
        if let Some(error) = self.script().finalize_error.clone() {
            return Err(error.into());
        }
        Ok(self.receipt(format!("media-{}", handle.remote_id())))
    }

    async fn disconnect(&self, _credential: &PlatformCredential) -> Result<()> {
        self.calls().disconnects += 1;
        match self.script().disconnect_error.clone() {
            Some(message) => Err(CastError::Network(message)),
            None => Ok(()),
        }
    }
}
