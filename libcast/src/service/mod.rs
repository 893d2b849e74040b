//! Orchestrator facade
//!
//! [`CastService`] is the single entry point the binaries (or any other
//! front end) use. It owns the credential store, the lifecycle manager, the
//! transform tracker, the adapters and the event bus, and wires them
//! together:
//!
//! - connect / disconnect platforms
//! - upload one source and derive a variant per connected platform
//! - publish each ready variant, one job per platform, all concurrently
//!
//! Every platform has its own cancellation token, a child of the service
//! token. Disconnecting a platform cancels its pending probes and polls;
//! [`CastService::shutdown`] cancels everything.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use libcast::oauth::LoopbackLauncher;
//! use libcast::service::CastService;
//! use libcast::Config;
//!
//! # async fn example() -> libcast::Result<()> {
//! let config = Config::load()?;
//! let launcher = Arc::new(LoopbackLauncher::new(config.auth.redirect_port));
//! let service = CastService::from_config(config, launcher)?;
//!
//! let report = service
//!     .upload_and_publish(Path::new("clip.mp4"), "Launch day")
//!     .await?;
//! for outcome in &report.outcomes {
//!     println!("{}: {}", outcome.platform, outcome.summary());
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;

use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use self::events::{EventBus, EventReceiver};
use crate::broker::{HttpTokenBroker, TokenBroker};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{CastError, Result};
use crate::lifecycle::CredentialLifecycleManager;
use crate::oauth::AuthLauncher;
use crate::platforms::instagram::InstagramAdapter;
use crate::platforms::tiktok::TikTokAdapter;
use crate::platforms::youtube::YouTubeAdapter;
use crate::platforms::{http, AdapterRegistry};
use crate::publish::{CompletionKind, PublishJob, PublishMachine, PublishState};
use crate::transform::cloudinary::CloudinaryClient;
use crate::transform::{MediaAsset, TransformTracker, TranscodingService, TransformedVariant};
use crate::types::{
    ConnectOutcome, ContentType, CredentialStatus, Platform, PlatformCredential, VariantKey,
};

const EVENT_CAPACITY: usize = 256;

/// The collaborators a [`CastService`] is assembled from
pub struct ServiceComponents {
    pub store: CredentialStore,
    pub adapters: AdapterRegistry,
    pub broker: Arc<dyn TokenBroker>,
    pub launcher: Arc<dyn AuthLauncher>,
    pub transcoder: Arc<dyn TranscodingService>,
}

/// Result of publishing to one platform
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub platform: Platform,
    pub content_type: ContentType,
    /// Delivery URL of the variant that was (or would have been) published
    pub variant_url: Option<String>,
    /// The job, when one was started
    pub job: Option<PublishJob>,
    /// Why no job was started
    pub skipped: Option<String>,
}

impl PublishOutcome {
    fn skipped(key: VariantKey, variant_url: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            platform: key.platform,
            content_type: key.content_type,
            variant_url,
            job: None,
            skipped: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.job.as_ref().is_some_and(PublishJob::is_complete)
    }

    pub fn completion_kind(&self) -> Option<CompletionKind> {
        self.job.as_ref().and_then(|job| job.completion_kind)
    }

    /// One-line human readable result
    pub fn summary(&self) -> String {
        match (&self.job, &self.skipped) {
            (Some(job), _) if job.state == PublishState::Complete => {
                match (job.completion_kind, &job.permalink) {
                    (Some(CompletionKind::AwaitingUserAction), _) => {
                        "sent to inbox, finish the post in the app".to_string()
                    }
                    (_, Some(permalink)) => format!("published {}", permalink),
                    _ => "published".to_string(),
                }
            }
            (Some(job), _) => match &job.error {
                Some(error) => format!("failed: {}", error),
                None => format!("ended in {}", job.state),
            },
            (None, Some(reason)) => format!("skipped: {}", reason),
            (None, None) => "not attempted".to_string(),
        }
    }
}

/// Aggregated result of one upload-and-publish run
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub source_id: String,
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishReport {
    pub fn outcome(&self, platform: Platform) -> Option<&PublishOutcome> {
        self.outcomes.iter().find(|o| o.platform == platform)
    }

    /// At least one platform completed
    pub fn any_success(&self) -> bool {
        self.outcomes.iter().any(PublishOutcome::is_success)
    }

    pub fn all_success(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(PublishOutcome::is_success)
    }
}

pub struct CastService {
    config: Arc<Config>,
    store: CredentialStore,
    adapters: AdapterRegistry,
    lifecycle: Arc<CredentialLifecycleManager>,
    tracker: TransformTracker,
    machine: PublishMachine,
    events: EventBus,
    root: CancellationToken,
    platform_tokens: Mutex<HashMap<Platform, CancellationToken>>,
}

impl CastService {
    /// Wire the real adapters, broker and transcoding client from `config`
    pub fn from_config(config: Config, launcher: Arc<dyn AuthLauncher>) -> Result<Self> {
        config.validate()?;
        let client = http::build_client()?;
        let store = CredentialStore::open(&config.store.path)?;
        let broker: Arc<dyn TokenBroker> =
            Arc::new(HttpTokenBroker::new(config.broker.base_url.clone(), client.clone()));

        let adapters = AdapterRegistry::new()
            .with(Arc::new(InstagramAdapter::new(
                config.instagram.clone(),
                client.clone(),
            )))
            .with(Arc::new(YouTubeAdapter::new(
                config.youtube.clone(),
                client.clone(),
            )))
            .with(Arc::new(TikTokAdapter::new(
                config.tiktok.clone(),
                client.clone(),
                Arc::clone(&broker),
            )));
        let transcoder = Arc::new(CloudinaryClient::new(config.transform.clone(), client));

        Ok(Self::with_components(
            config,
            ServiceComponents {
                store,
                adapters,
                broker,
                launcher,
                transcoder,
            },
        ))
    }

    pub fn with_components(config: Config, components: ServiceComponents) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(EVENT_CAPACITY);
        let lifecycle = CredentialLifecycleManager::new(
            components.store.clone(),
            components.adapters.clone(),
            components.broker,
            components.launcher,
            config.auth.clone(),
            events.clone(),
        );
        let tracker = TransformTracker::new(components.transcoder, Arc::clone(&config), events.clone());
        let machine = PublishMachine::new(config.publish.poll_interval, events.clone());

        Self {
            config,
            store: components.store,
            adapters: components.adapters,
            lifecycle,
            tracker,
            machine,
            events,
            root: CancellationToken::new(),
            platform_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<CredentialLifecycleManager> {
        &self.lifecycle
    }

    pub fn tracker(&self) -> &TransformTracker {
        &self.tracker
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Token for work on `platform`; replaced once cancelled
    fn platform_token(&self, platform: Platform) -> CancellationToken {
        let mut tokens = self
            .platform_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let token = tokens
            .entry(platform)
            .or_insert_with(|| self.root.child_token());
        if token.is_cancelled() && !self.root.is_cancelled() {
            *token = self.root.child_token();
        }
        token.clone()
    }

    pub async fn connect(&self, platform: Platform) -> ConnectOutcome {
        self.lifecycle.connect(platform).await
    }

    /// Stop everything running for `platform`, then revoke and clear it
    pub async fn disconnect(&self, platform: Platform) -> Result<()> {
        let token = self
            .platform_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&platform);
        if let Some(token) = token {
            tracing::debug!("Cancelling pending work for {}", platform);
            token.cancel();
        }
        self.lifecycle.disconnect(platform).await
    }

    pub fn status(&self, platform: Platform) -> Result<CredentialStatus> {
        self.lifecycle.status(platform)
    }

    /// Platforms whose stored credential is connected
    pub fn connected_platforms(&self) -> Result<BTreeSet<Platform>> {
        let mut connected = BTreeSet::new();
        for platform in Platform::ALL {
            if self.lifecycle.status(platform)? == CredentialStatus::Connected {
                connected.insert(platform);
            }
        }
        Ok(connected)
    }

    fn require_connected(&self) -> Result<BTreeSet<Platform>> {
        let connected = self.connected_platforms()?;
        if connected.is_empty() {
            return Err(CastError::InvalidInput(
                "No connected platforms; run cast-creds connect first".to_string(),
            ));
        }
        Ok(connected)
    }

    /// Upload `source` and derive a ready variant for every connected platform
    ///
    /// Probing for a platform stops when it is disconnected; its variant is
    /// then `Failed`.
    pub async fn process(&self, source: &Path) -> Result<MediaAsset> {
        let keys: Vec<(VariantKey, CancellationToken)> = self
            .require_connected()?
            .into_iter()
            .map(|platform| (VariantKey::default_for(platform), self.platform_token(platform)))
            .collect();
        let targets: Vec<VariantKey> = keys.iter().map(|(key, _)| *key).collect();

        let uploaded = self.tracker.upload(source).await?;
        self.tracker.announce(&uploaded, &targets);

        let variants = join_all(
            keys.iter()
                .map(|(key, cancel)| self.tracker.prepare_variant(&uploaded, *key, cancel)),
        )
        .await;
        Ok(MediaAsset::new(uploaded.public_id, uploaded.meta, variants))
    }

    /// Publish every ready variant of `asset` whose platform is connected
    pub async fn publish(&self, asset: &MediaAsset, caption: &str) -> PublishReport {
        let outcomes = join_all(
            asset
                .variants()
                .map(|variant| {
                    let cancel = self.platform_token(variant.platform());
                    async move { self.publish_variant(variant, caption, &cancel).await }
                }),
        )
        .await;

        PublishReport {
            source_id: asset.source_id().to_string(),
            outcomes,
        }
    }

    /// Upload once, then run one probe-then-publish pipeline per connected
    /// platform
    ///
    /// A platform publishes as soon as its own variant is ready; it never
    /// waits for the others.
    pub async fn upload_and_publish(&self, source: &Path, caption: &str) -> Result<PublishReport> {
        let targets: Vec<VariantKey> = self
            .require_connected()?
            .into_iter()
            .map(VariantKey::default_for)
            .collect();
        self.upload_and_publish_targets(source, &targets, caption).await
    }

    /// Like [`upload_and_publish`](Self::upload_and_publish) with explicit
    /// content types; targets whose platform is not connected are skipped
    pub async fn upload_and_publish_targets(
        &self,
        source: &Path,
        targets: &[VariantKey],
        caption: &str,
    ) -> Result<PublishReport> {
        let keys: BTreeSet<VariantKey> = targets.iter().copied().collect();
        for key in &keys {
            if !key.platform.supports(key.content_type) {
                return Err(CastError::InvalidInput(format!(
                    "{} does not support {} content",
                    key.platform, key.content_type
                )));
            }
        }

        let mut skipped = Vec::new();
        let mut active = Vec::new();
        for key in keys {
            if self.lifecycle.credential(key.platform)?.is_some() {
                active.push((key, self.platform_token(key.platform)));
            } else {
                tracing::info!("Skipping {}: {} is not connected", key, key.platform);
                skipped.push(PublishOutcome::skipped(
                    key,
                    None,
                    format!("{} is not connected", key.platform),
                ));
            }
        }
        if active.is_empty() {
            return Err(CastError::InvalidInput(
                "None of the selected platforms is connected".to_string(),
            ));
        }
        let targets: Vec<VariantKey> = active.iter().map(|(key, _)| *key).collect();

        let uploaded = self.tracker.upload(source).await?;
        self.tracker.announce(&uploaded, &targets);

        let pipelines = active.iter().map(|(key, cancel)| {
            let uploaded = &uploaded;
            async move {
                let variant = self.tracker.prepare_variant(uploaded, *key, cancel).await;
                self.publish_variant(&variant, caption, cancel).await
            }
        });
        let mut outcomes = join_all(pipelines).await;
        outcomes.extend(skipped);

        Ok(PublishReport {
            source_id: uploaded.public_id,
            outcomes,
        })
    }

    async fn publish_variant(
        &self,
        variant: &TransformedVariant,
        caption: &str,
        cancel: &CancellationToken,
    ) -> PublishOutcome {
        let key = variant.key();
        let url = Some(variant.url().to_string());
        if !variant.is_ready() {
            return PublishOutcome::skipped(key, url, format!("variant is {:?}", variant.state()));
        }

        let credential = match self.usable_credential(key.platform).await {
            Ok(credential) => credential,
            Err(reason) => {
                tracing::info!("Skipping {}: {}", key, reason);
                return PublishOutcome::skipped(key, url, reason);
            }
        };
        let adapter = match self.adapters.get(key.platform) {
            Ok(adapter) => adapter,
            Err(e) => return PublishOutcome::skipped(key, url, e.to_string()),
        };

        let job = self
            .machine
            .run(adapter, &credential, variant, caption, key.content_type, cancel)
            .await;
        PublishOutcome {
            platform: key.platform,
            content_type: key.content_type,
            variant_url: url,
            job: Some(job),
            skipped: None,
        }
    }

    /// Stored credential for `platform`; expired or invalid tokens go
    /// through [`CredentialLifecycleManager::ensure_valid`] first
    async fn usable_credential(&self, platform: Platform) -> std::result::Result<PlatformCredential, String> {
        let credential = match self.lifecycle.credential(platform) {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(format!("{} is not connected", platform)),
            Err(e) => return Err(e.to_string()),
        };
        match credential.status {
            CredentialStatus::Connected if !credential.is_expired() => Ok(credential),
            CredentialStatus::Connected | CredentialStatus::Invalid => {
                tracing::info!("{} token needs repair, refreshing before publish", platform);
                self.lifecycle
                    .ensure_valid(platform)
                    .await
                    .map_err(|e| format!("token is not usable and refresh failed: {}", e))
            }
            status => Err(format!("{} credential is {}", platform, status)),
        }
    }

    /// Cancel every pending probe, poll and connect
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down orchestrator");
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::error::PublishError;
    use crate::oauth::ChannelLauncher;
    use crate::platforms::mock::{connected_credential, MockAdapter};
    use crate::platforms::RemoteStatus;
    use crate::transform::mock::MockTranscoder;
    use crate::transform::VariantState;
    use crate::service::events::Event;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct Harness {
        service: Arc<CastService>,
        instagram: Arc<MockAdapter>,
        youtube: Arc<MockAdapter>,
        tiktok: Arc<MockAdapter>,
        transcoder: Arc<MockTranscoder>,
        broker: Arc<MockBroker>,
    }

    fn harness(instagram: MockAdapter) -> Harness {
        let instagram = Arc::new(instagram);
        let youtube = Arc::new(MockAdapter::single_shot(Platform::YouTube));
        let tiktok = Arc::new(MockAdapter::inbox(Platform::TikTok));
        let transcoder = Arc::new(MockTranscoder::new("cast_0123456789abcdef"));
        let broker = Arc::new(MockBroker::new());
        let service = CastService::with_components(
            Config::default(),
            ServiceComponents {
                store: CredentialStore::in_memory(),
                adapters: AdapterRegistry::new()
                    .with(instagram.clone())
                    .with(youtube.clone())
                    .with(tiktok.clone()),
                broker: broker.clone(),
                launcher: Arc::new(ChannelLauncher::new()),
                transcoder: transcoder.clone(),
            },
        );
        Harness {
            service: Arc::new(service),
            instagram,
            youtube,
            tiktok,
            transcoder,
            broker,
        }
    }

    fn connect(h: &Harness, platforms: &[Platform]) {
        for platform in platforms {
            h.service
                .store()
                .save(&connected_credential(*platform))
                .unwrap();
        }
    }

    fn source_file() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not really a video").unwrap();
        file
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_and_publish_only_connected_platforms() {
        let h = harness(MockAdapter::container(
            Platform::Instagram,
            vec![RemoteStatus::InProgress, RemoteStatus::Finished],
        ));
        connect(&h, &[Platform::Instagram, Platform::YouTube]);
        let file = source_file();

        let report = h
            .service
            .upload_and_publish(file.path(), "First cut")
            .await
            .unwrap();

        assert_eq!(report.source_id, "cast_0123456789abcdef");
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.all_success());
        assert!(report.outcome(Platform::TikTok).is_none());
        assert_eq!(h.tiktok.create_count(), 0);
        assert_eq!(h.transcoder.upload_count(), 1);

        let instagram = report.outcome(Platform::Instagram).unwrap();
        assert_eq!(instagram.content_type, ContentType::Reel);
        assert_eq!(instagram.completion_kind(), Some(CompletionKind::Published));
        assert_eq!(h.instagram.finalize_count(), 1);
        assert_eq!(h.instagram.captions(), vec!["First cut".to_string()]);

        let youtube = report.outcome(Platform::YouTube).unwrap();
        assert!(youtube.job.as_ref().unwrap().visited(PublishState::Complete));
        assert!(!youtube.job.as_ref().unwrap().visited(PublishState::Waiting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_then_publish() {
        let h = harness(MockAdapter::container(
            Platform::Instagram,
            vec![RemoteStatus::Finished],
        ));
        connect(&h, &[Platform::Instagram, Platform::TikTok]);
        let file = source_file();

        let asset = h.service.process(file.path()).await.unwrap();
        assert_eq!(asset.len(), 2);
        assert!(asset.variants().all(TransformedVariant::is_ready));

        let report = h.service.publish(&asset, "caption").await;
        let tiktok = report.outcome(Platform::TikTok).unwrap();
        assert!(tiktok.is_success());
        assert_eq!(
            tiktok.completion_kind(),
            Some(CompletionKind::AwaitingUserAction)
        );
        assert_eq!(h.youtube.create_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_connected_is_invalid_input() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        let file = source_file();
        let err = h
            .service
            .upload_and_publish(file.path(), "")
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(h.transcoder.upload_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_skips_platform_disconnected_after_processing() {
        let h = harness(MockAdapter::container(
            Platform::Instagram,
            vec![RemoteStatus::Finished],
        ));
        connect(&h, &[Platform::Instagram, Platform::YouTube]);
        let file = source_file();
        let asset = h.service.process(file.path()).await.unwrap();

        h.service.disconnect(Platform::YouTube).await.unwrap();
        let report = h.service.publish(&asset, "").await;

        let youtube = report.outcome(Platform::YouTube).unwrap();
        assert!(youtube.job.is_none());
        assert!(youtube.summary().starts_with("skipped"));
        assert_eq!(h.youtube.create_count(), 0);
        assert!(report.outcome(Platform::Instagram).unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_waiting_job() {
        // never finishes on its own
        let h = harness(MockAdapter::container(Platform::Instagram, vec![]));
        connect(&h, &[Platform::Instagram]);
        let file = source_file();

        let task = tokio::spawn({
            let service = h.service.clone();
            let path = file.path().to_path_buf();
            async move { service.upload_and_publish(&path, "").await }
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.instagram.poll_count() > 0);

        h.service.disconnect(Platform::Instagram).await.unwrap();
        let report = task.await.unwrap().unwrap();

        let job = report.outcome(Platform::Instagram).unwrap().job.clone().unwrap();
        assert_eq!(job.state, PublishState::Error);
        assert!(matches!(job.error, Some(PublishError::Cancelled)));
        assert_eq!(h.instagram.finalize_count(), 0);
        assert!(h.service.store().keys(Platform::Instagram).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_credential_refreshed_before_publish() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        let mut credential = connected_credential(Platform::YouTube);
        credential.refresh_token = Some("1//refresh".to_string());
        credential.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
        h.service.store().save(&credential).unwrap();
        let file = source_file();

        let report = h
            .service
            .upload_and_publish_targets(
                file.path(),
                &[VariantKey::default_for(Platform::YouTube)],
                "",
            )
            .await
            .unwrap();

        assert!(report.outcome(Platform::YouTube).unwrap().is_success());
        assert_eq!(h.broker.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credential_refreshed_before_publish() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        let mut credential = connected_credential(Platform::YouTube);
        credential.refresh_token = Some("1//refresh".to_string());
        credential.status = CredentialStatus::Invalid;
        h.service.store().save(&credential).unwrap();
        h.youtube.reject_tokens();
        let file = source_file();

        let report = h
            .service
            .upload_and_publish_targets(
                file.path(),
                &[VariantKey::default_for(Platform::YouTube)],
                "",
            )
            .await
            .unwrap();

        assert!(report.outcome(Platform::YouTube).unwrap().is_success());
        assert_eq!(h.broker.refresh_count(), 1);
        assert_eq!(
            h.service.status(Platform::YouTube).unwrap(),
            CredentialStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconnected_targets_are_never_probed() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        connect(&h, &[Platform::Instagram]);
        let file = source_file();

        let report = h
            .service
            .upload_and_publish_targets(
                file.path(),
                &[
                    VariantKey::default_for(Platform::Instagram),
                    VariantKey::default_for(Platform::TikTok),
                ],
                "",
            )
            .await
            .unwrap();

        assert!(report.outcome(Platform::Instagram).unwrap().is_success());
        let tiktok = report.outcome(Platform::TikTok).unwrap();
        assert!(tiktok.job.is_none());
        assert!(tiktok.variant_url.is_none());
        assert_eq!(tiktok.summary(), "skipped: tiktok is not connected");
        assert!(h
            .transcoder
            .probed_urls()
            .iter()
            .all(|url| !url.contains("eo_60")));
        assert_eq!(h.tiktok.create_count(), 0);
    }

    #[tokio::test]
    async fn test_targets_without_any_connection_skip_upload() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        let file = source_file();
        let err = h
            .service
            .upload_and_publish_targets(
                file.path(),
                &[VariantKey::default_for(Platform::YouTube)],
                "",
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(h.transcoder.upload_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_probing_during_process() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        connect(&h, &[Platform::Instagram, Platform::YouTube]);
        h.transcoder.never_ready();
        let mut events = h.service.subscribe();
        let file = source_file();

        let task = tokio::spawn({
            let service = h.service.clone();
            let path = file.path().to_path_buf();
            async move { service.process(&path).await }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        h.service.disconnect(Platform::YouTube).await.unwrap();
        let asset = task.await.unwrap().unwrap();

        let youtube = asset
            .variant(VariantKey::default_for(Platform::YouTube))
            .unwrap();
        assert_eq!(youtube.state(), VariantState::Failed);
        assert!(youtube.attempts() < h.service.config().transform.max_attempts);
        let instagram = asset
            .variant(VariantKey::default_for(Platform::Instagram))
            .unwrap();
        assert!(instagram.is_ready());

        let mut ready = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::VariantReady { platform, .. } = event {
                ready.push(platform);
            }
        }
        assert_eq!(ready, vec![Platform::Instagram]);
    }

    #[tokio::test]
    async fn test_unsupported_target_rejected_before_upload() {
        let h = harness(MockAdapter::single_shot(Platform::Instagram));
        let file = source_file();
        let err = h
            .service
            .upload_and_publish_targets(
                file.path(),
                &[VariantKey::new(Platform::TikTok, ContentType::Story)],
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::InvalidInput(_)));
        assert_eq!(h.transcoder.upload_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pipelines() {
        let h = harness(MockAdapter::container(Platform::Instagram, vec![]));
        connect(&h, &[Platform::Instagram]);
        h.transcoder.never_ready();
        let file = source_file();

        let task = tokio::spawn({
            let service = h.service.clone();
            let path = file.path().to_path_buf();
            async move { service.upload_and_publish(&path, "").await }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.service.shutdown();

        let report = task.await.unwrap().unwrap();
        let outcome = report.outcome(Platform::Instagram).unwrap();
        assert!(outcome.job.is_none());
        assert_eq!(h.instagram.create_count(), 0);
    }
}
