//! Media Transform Job Tracker
//!
//! The source video is uploaded once to the transcoding service. Each target
//! platform then gets a deterministic delivery URL that asks the service for a
//! rendition matching that platform's constraints (9:16 fill, 1080x1920, mp4,
//! optionally trimmed). The service renders lazily, so every URL is probed
//! until it answers.
//!
//! Probing is bounded: after `max_attempts` tries the variant is marked ready
//! anyway and a warning is logged. Platforms fetch the URL themselves and an
//! in-flight render usually finishes before they do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{CastError, Result, TransformError};
use crate::service::events::{Event, EventBus};
use crate::types::{ContentType, Platform, VariantKey};

pub mod cloudinary;
pub mod mock;

pub use cloudinary::CloudinaryClient;

/// 9:16 portrait
pub const VERTICAL_ASPECT: f64 = 9.0 / 16.0;

/// Metadata the transcoding service reports for an upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: u64,
}

impl MediaMeta {
    pub fn aspect_ratio(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if h > 0 => Some(w as f64 / h as f64),
            _ => None,
        }
    }
}

/// Result of uploading the source once
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedSource {
    /// Content-addressed identifier assigned by the service
    pub public_id: String,
    pub meta: MediaMeta,
}

/// How a delivery URL should render the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformProfile {
    pub width: u32,
    pub height: u32,
    pub crop: &'static str,
    pub format: &'static str,
    pub quality: &'static str,
    /// Trim window in seconds
    pub start_offset: Option<u32>,
    pub end_offset: Option<u32>,
}

impl TransformProfile {
    fn vertical() -> Self {
        Self {
            width: 1080,
            height: 1920,
            crop: "fill",
            format: "mp4",
            quality: "auto:best",
            start_offset: None,
            end_offset: None,
        }
    }

    /// Rendition for a variant key
    pub fn for_variant(key: VariantKey, config: &Config) -> Self {
        let mut profile = Self::vertical();
        match key.content_type {
            ContentType::TikTokVideo => {
                profile.start_offset = Some(0);
                profile.end_offset = Some(config.tiktok.max_duration_secs);
            }
            ContentType::Story => {
                profile.start_offset = Some(0);
                profile.end_offset = Some(60);
            }
            ContentType::Reel | ContentType::Short => {}
        }
        profile
    }

    /// Still frame one second in, used as the YouTube thumbnail
    pub fn thumbnail() -> Self {
        Self {
            format: "jpg",
            start_offset: Some(1),
            ..Self::vertical()
        }
    }

    /// Transformation string, e.g. `c_fill,w_1080,h_1920,f_mp4,q_auto:best,so_0,eo_60`
    pub fn transformation(&self) -> String {
        let mut parts = vec![
            format!("c_{}", self.crop),
            format!("w_{}", self.width),
            format!("h_{}", self.height),
            format!("f_{}", self.format),
            format!("q_{}", self.quality),
        ];
        if let Some(start) = self.start_offset {
            parts.push(format!("so_{}", start));
        }
        if let Some(end) = self.end_offset {
            parts.push(format!("eo_{}", end));
        }
        parts.join(",")
    }
}

/// Answer of one availability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    /// Still rendering or otherwise unavailable, with the HTTP status seen
    NotReady(u16),
}

/// Remote transcoding and storage service
#[async_trait]
pub trait TranscodingService: Send + Sync {
    async fn upload(&self, source: &Path) -> Result<UploadedSource>;

    /// Deterministic delivery URL for `public_id` rendered with `profile`
    fn delivery_url(&self, public_id: &str, profile: &TransformProfile) -> String;

    async fn probe(&self, url: &str) -> Result<ProbeOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantState {
    Pending,
    Validating,
    Ready,
    Failed,
}

/// A platform-specific rendition of the source
///
/// Only the tracker moves a variant through its states, and a ready variant
/// never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedVariant {
    platform: Platform,
    content_type: ContentType,
    url: String,
    thumbnail_url: Option<String>,
    state: VariantState,
    attempts: u32,
    last_checked_at: Option<DateTime<Utc>>,
    validated: bool,
}

impl TransformedVariant {
    pub(crate) fn pending(key: VariantKey, url: String) -> Self {
        Self {
            platform: key.platform,
            content_type: key.content_type,
            url,
            thumbnail_url: None,
            state: VariantState::Pending,
            attempts: 0,
            last_checked_at: None,
            validated: false,
        }
    }

    /// A ready variant for media that is already hosted and rendered
    pub fn pre_validated(key: VariantKey, url: impl Into<String>) -> Self {
        Self {
            state: VariantState::Ready,
            validated: true,
            ..Self::pending(key, url.into())
        }
    }

    pub fn key(&self) -> VariantKey {
        VariantKey::new(self.platform, self.content_type)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }

    pub fn state(&self) -> VariantState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == VariantState::Ready
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at
    }

    /// False when the variant was let through without a successful probe
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    fn transition(&mut self, to: VariantState) -> bool {
        if self.state == VariantState::Ready {
            tracing::warn!("Refusing to change ready variant {}", self.key());
            return false;
        }
        self.state = to;
        true
    }

    pub(crate) fn begin_validation(&mut self) {
        self.transition(VariantState::Validating);
    }

    pub(crate) fn record_probes(&mut self, attempts: u32, at: DateTime<Utc>) {
        if self.state != VariantState::Ready {
            self.attempts += attempts;
            self.last_checked_at = Some(at);
        }
    }

    pub(crate) fn mark_ready(&mut self, validated: bool) {
        if self.transition(VariantState::Ready) {
            self.validated = validated;
        }
    }

    pub(crate) fn mark_failed(&mut self) {
        self.transition(VariantState::Failed);
    }

    pub(crate) fn set_thumbnail(&mut self, url: Option<String>) {
        if self.state != VariantState::Ready {
            self.thumbnail_url = url;
        }
    }
}

/// One uploaded source and its renditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    source_id: String,
    original_meta: MediaMeta,
    variants: BTreeMap<VariantKey, TransformedVariant>,
}

impl MediaAsset {
    pub fn new(
        source_id: String,
        original_meta: MediaMeta,
        variants: impl IntoIterator<Item = TransformedVariant>,
    ) -> Self {
        Self {
            source_id,
            original_meta,
            variants: variants.into_iter().map(|v| (v.key(), v)).collect(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn original_meta(&self) -> &MediaMeta {
        &self.original_meta
    }

    pub fn variant(&self, key: VariantKey) -> Option<&TransformedVariant> {
        self.variants.get(&key)
    }

    pub fn variants(&self) -> impl Iterator<Item = &TransformedVariant> {
        self.variants.values()
    }

    pub fn ready_variants(&self) -> impl Iterator<Item = &TransformedVariant> {
        self.variants.values().filter(|v| v.is_ready())
    }

    pub fn platforms(&self) -> BTreeSet<Platform> {
        self.variants.keys().map(|key| key.platform).collect()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Advisory problems with the source for one platform
///
/// Nothing here blocks processing; the transcoding service crops and trims.
pub fn assess_source(meta: &MediaMeta, platform: Platform, config: &Config) -> Vec<String> {
    let (tolerance, max_duration) = match platform {
        Platform::Instagram => (
            config.instagram.aspect_tolerance,
            config.instagram.max_duration_secs,
        ),
        Platform::YouTube => (config.youtube.aspect_tolerance, config.youtube.max_duration_secs),
        Platform::TikTok => (config.tiktok.aspect_tolerance, config.tiktok.max_duration_secs),
    };

    let mut warnings = Vec::new();
    if let Some(ratio) = meta.aspect_ratio() {
        if (ratio - VERTICAL_ASPECT).abs() > tolerance {
            warnings.push(format!(
                "{}: aspect ratio {:.2} is outside 9:16 \u{b1} {}, the video will be cropped",
                platform, ratio, tolerance
            ));
        }
    }
    if let Some(duration) = meta.duration_secs {
        if duration > max_duration as f64 {
            warnings.push(format!(
                "{}: duration {:.1}s exceeds the {}s limit",
                platform, duration, max_duration
            ));
        }
    }
    warnings
}

enum ProbeResult {
    Ready(u32),
    Exhausted(u32),
    Cancelled(u32),
}

/// Uploads sources and drives variants to `ready`
pub struct TransformTracker {
    service: Arc<dyn TranscodingService>,
    config: Arc<Config>,
    events: EventBus,
}

impl TransformTracker {
    pub fn new(service: Arc<dyn TranscodingService>, config: Arc<Config>, events: EventBus) -> Self {
        Self {
            service,
            config,
            events,
        }
    }

    /// Upload once and derive a ready variant per platform
    ///
    /// Each platform gets its default content type. The returned asset holds
    /// exactly one variant per target and none of them is pending.
    pub async fn process(
        &self,
        source: &Path,
        targets: &BTreeSet<Platform>,
        cancel: &CancellationToken,
    ) -> Result<MediaAsset> {
        let keys: Vec<VariantKey> = targets.iter().map(|p| VariantKey::default_for(*p)).collect();
        self.process_targets(source, &keys, cancel).await
    }

    /// Like [`process`](Self::process) with explicit content types
    pub async fn process_targets(
        &self,
        source: &Path,
        keys: &[VariantKey],
        cancel: &CancellationToken,
    ) -> Result<MediaAsset> {
        let keys = dedup_keys(keys)?;
        let uploaded = self.upload(source).await?;
        self.announce(&uploaded, &keys);

        let variants = join_all(
            keys.iter()
                .map(|key| self.prepare_variant(&uploaded, *key, cancel)),
        )
        .await;

        Ok(MediaAsset::new(
            uploaded.public_id,
            uploaded.meta,
            variants,
        ))
    }

    /// Upload the source file to the transcoding service
    pub async fn upload(&self, source: &Path) -> Result<UploadedSource> {
        if !source.is_file() {
            return Err(CastError::InvalidInput(format!(
                "Source file not found: {}",
                source.display()
            )));
        }
        tracing::info!("Uploading {} to transcoding service", source.display());
        let uploaded = self.service.upload(source).await.map_err(|e| match e {
            CastError::Transform(_) => e,
            other => TransformError::UploadFailed(other.to_string()).into(),
        })?;
        tracing::info!(
            public_id = %uploaded.public_id,
            "Upload complete ({} bytes)",
            uploaded.meta.size_bytes
        );
        Ok(uploaded)
    }

    /// Log advisory warnings and emit `TransformStarted`
    pub fn announce(&self, uploaded: &UploadedSource, keys: &[VariantKey]) {
        let platforms: BTreeSet<Platform> = keys.iter().map(|k| k.platform).collect();
        for platform in platforms {
            for warning in assess_source(&uploaded.meta, platform, &self.config) {
                tracing::warn!("{}", warning);
            }
        }
        self.events.emit(Event::TransformStarted {
            source_id: uploaded.public_id.clone(),
            targets: keys.to_vec(),
        });
    }

    /// Derive the variant for `key` without probing it
    pub fn derive(&self, uploaded: &UploadedSource, key: VariantKey) -> TransformedVariant {
        let profile = TransformProfile::for_variant(key, &self.config);
        let url = self.service.delivery_url(&uploaded.public_id, &profile);
        let mut variant = TransformedVariant::pending(key, url);
        if key.platform == Platform::YouTube {
            let thumbnail = self
                .service
                .delivery_url(&uploaded.public_id, &TransformProfile::thumbnail());
            variant.set_thumbnail(Some(thumbnail));
        }
        variant
    }

    /// Derive and probe one variant
    ///
    /// Resolves to `Ready` (validated or let through) unless `cancel` fires,
    /// in which case the variant is `Failed`.
    pub async fn prepare_variant(
        &self,
        uploaded: &UploadedSource,
        key: VariantKey,
        cancel: &CancellationToken,
    ) -> TransformedVariant {
        let mut variant = self.derive(uploaded, key);
        variant.begin_validation();
        tracing::debug!("Probing {} at {}", key, variant.url());

        let video = self.probe_until_ready(variant.url(), cancel);
        let thumbnail = async {
            match variant.thumbnail_url() {
                Some(url) => Some(self.probe_until_ready(url, cancel).await),
                None => None,
            }
        };
        let (video, thumbnail) = tokio::join!(video, thumbnail);

        if let Some(ProbeResult::Exhausted(_) | ProbeResult::Cancelled(_)) = thumbnail {
            tracing::warn!("Thumbnail for {} is unavailable, publishing without it", key);
            variant.set_thumbnail(None);
        }

        let now = Utc::now();
        match video {
            ProbeResult::Ready(attempts) => {
                variant.record_probes(attempts, now);
                variant.mark_ready(true);
            }
            ProbeResult::Exhausted(attempts) => {
                variant.record_probes(attempts, now);
                let exhausted = TransformError::ValidationExhausted {
                    attempts,
                    url: variant.url().to_string(),
                };
                tracing::warn!("{}; continuing with {} anyway", exhausted, key);
                variant.mark_ready(false);
            }
            ProbeResult::Cancelled(attempts) => {
                variant.record_probes(attempts, now);
                tracing::info!("Validation of {} cancelled", key);
                variant.mark_failed();
                return variant;
            }
        }

        self.events.emit(Event::VariantReady {
            source_id: uploaded.public_id.clone(),
            platform: key.platform,
            content_type: key.content_type,
            url: variant.url().to_string(),
            validated: variant.is_validated(),
            attempts: variant.attempts(),
        });
        variant
    }

    async fn probe_until_ready(&self, url: &str, cancel: &CancellationToken) -> ProbeResult {
        let max_attempts = self.config.transform.max_attempts;
        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return ProbeResult::Cancelled(attempt - 1),
                outcome = self.service.probe(url) => outcome,
            };
            match outcome {
                Ok(ProbeOutcome::Ready) => return ProbeResult::Ready(attempt),
                Ok(ProbeOutcome::NotReady(status)) => {
                    tracing::debug!("{} not ready (HTTP {}), attempt {}", url, status, attempt);
                }
                Err(e) => {
                    tracing::debug!("Probe of {} failed: {}, attempt {}", url, e, attempt);
                }
            }

            if attempt < max_attempts {
                let delay = self.config.transform.delay_for_attempt(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return ProbeResult::Cancelled(attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        ProbeResult::Exhausted(max_attempts)
    }
}

fn dedup_keys(keys: &[VariantKey]) -> Result<Vec<VariantKey>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for key in keys {
        if !key.platform.supports(key.content_type) {
            return Err(CastError::InvalidInput(format!(
                "{} does not accept {} content",
                key.platform, key.content_type
            )));
        }
        if seen.insert(*key) {
            out.push(*key);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::mock::MockTranscoder;
    use super::*;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn tracker(service: Arc<MockTranscoder>) -> (TransformTracker, EventBus) {
        let events = EventBus::new(32);
        let tracker = TransformTracker::new(service, Arc::new(Config::default()), events.clone());
        (tracker, events)
    }

    fn source_file() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"fake mp4 bytes").unwrap();
        file
    }

    #[test]
    fn test_transformation_strings() {
        let config = Config::default();
        let reel = TransformProfile::for_variant(VariantKey::default_for(Platform::Instagram), &config);
        assert_eq!(reel.transformation(), "c_fill,w_1080,h_1920,f_mp4,q_auto:best");

        let tiktok = TransformProfile::for_variant(VariantKey::default_for(Platform::TikTok), &config);
        assert_eq!(
            tiktok.transformation(),
            "c_fill,w_1080,h_1920,f_mp4,q_auto:best,so_0,eo_60"
        );

        assert_eq!(
            TransformProfile::thumbnail().transformation(),
            "c_fill,w_1080,h_1920,f_jpg,q_auto:best,so_1"
        );
    }

    #[test]
    fn test_assess_source_tolerances_differ_per_platform() {
        let config = Config::default();
        // 0.7 is 0.1375 away from 9:16
        let meta = MediaMeta {
            duration_secs: Some(15.0),
            width: Some(700),
            height: Some(1000),
            size_bytes: 1,
        };
        assert_eq!(assess_source(&meta, Platform::YouTube, &config).len(), 1);
        assert!(assess_source(&meta, Platform::TikTok, &config).is_empty());
    }

    #[test]
    fn test_assess_source_duration() {
        let config = Config::default();
        let meta = MediaMeta {
            duration_secs: Some(75.0),
            width: Some(1080),
            height: Some(1920),
            size_bytes: 1,
        };
        let warnings = assess_source(&meta, Platform::TikTok, &config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("60s limit"));
        assert!(assess_source(&meta, Platform::Instagram, &config).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_only_requested_platforms() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        let (tracker, _events) = tracker(service.clone());
        let file = source_file();
        let targets: BTreeSet<Platform> = [Platform::Instagram, Platform::YouTube].into_iter().collect();

        let asset = tracker
            .process(file.path(), &targets, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(asset.source_id(), "abc123");
        assert_eq!(asset.len(), 2);
        assert!(asset.variants().all(|v| v.is_ready() && v.is_validated()));
        assert!(asset
            .variant(VariantKey::new(Platform::Instagram, ContentType::Reel))
            .is_some());
        assert!(asset
            .variant(VariantKey::new(Platform::YouTube, ContentType::Short))
            .is_some());
        assert!(!asset.platforms().contains(&Platform::TikTok));
        assert_eq!(service.upload_count(), 1);
        assert!(service.probed_urls().iter().all(|url| !url.contains("eo_60")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_then_ready_follows_ramp() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        let url = service.url_for("abc123", "c_fill,w_1080,h_1920,f_mp4,q_auto:best", "mp4");
        service.script(&url, vec![
            ProbeOutcome::NotReady(423),
            ProbeOutcome::NotReady(423),
            ProbeOutcome::Ready,
        ]);
        let (tracker, _events) = tracker(service.clone());
        let file = source_file();

        let started = tokio::time::Instant::now();
        let asset = tracker
            .process_targets(
                file.path(),
                &[VariantKey::default_for(Platform::Instagram)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let variant = asset.variant(VariantKey::default_for(Platform::Instagram)).unwrap();
        assert!(variant.is_ready());
        assert!(variant.is_validated());
        assert_eq!(variant.attempts(), 3);
        assert!(variant.last_checked_at().is_some());
        // 1s after the first miss, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_fails_open() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        service.never_ready();
        let (tracker, events) = tracker(service.clone());
        let mut rx = events.subscribe();
        let file = source_file();

        let asset = tracker
            .process_targets(
                file.path(),
                &[VariantKey::default_for(Platform::TikTok)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let variant = asset.variant(VariantKey::default_for(Platform::TikTok)).unwrap();
        assert_eq!(variant.state(), VariantState::Ready);
        assert!(!variant.is_validated());
        assert_eq!(variant.attempts(), 6);
        assert_eq!(service.probe_count(), 6);

        assert!(matches!(rx.recv().await.unwrap(), Event::TransformStarted { .. }));
        match rx.recv().await.unwrap() {
            Event::VariantReady { validated, attempts, .. } => {
                assert!(!validated);
                assert_eq!(attempts, 6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_count_as_attempts() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        service.fail_probes();
        let (tracker, _events) = tracker(service.clone());
        let file = source_file();

        let asset = tracker
            .process_targets(
                file.path(),
                &[VariantKey::default_for(Platform::YouTube)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let variant = asset.variant(VariantKey::default_for(Platform::YouTube)).unwrap();
        assert!(variant.is_ready());
        assert_eq!(variant.attempts(), 6);
        // thumbnail never confirmed either, so it is dropped
        assert_eq!(variant.thumbnail_url(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_marks_failed_not_pending() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        service.never_ready();
        let (tracker, _events) = tracker(service.clone());
        let file = source_file();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let asset = tracker
            .process_targets(
                file.path(),
                &[VariantKey::default_for(Platform::Instagram)],
                &cancel,
            )
            .await
            .unwrap();

        let variant = asset.variant(VariantKey::default_for(Platform::Instagram)).unwrap();
        assert_eq!(variant.state(), VariantState::Failed);
        assert_eq!(variant.attempts(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_is_invalid_input() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        let (tracker, _events) = tracker(service.clone());
        let err = tracker
            .process_targets(
                Path::new("/definitely/not/here.mp4"),
                &[VariantKey::default_for(Platform::Instagram)],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::InvalidInput(_)));
        assert_eq!(service.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_transform_error() {
        let service = Arc::new(MockTranscoder::new("abc123"));
        service.fail_upload("preset not found");
        let (tracker, _events) = tracker(service);
        let file = source_file();
        let err = tracker
            .process_targets(
                file.path(),
                &[VariantKey::default_for(Platform::Instagram)],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CastError::Transform(TransformError::UploadFailed(_))
        ));
    }

    #[test]
    fn test_unsupported_content_type_rejected() {
        let err = dedup_keys(&[VariantKey::new(Platform::YouTube, ContentType::Story)]).unwrap_err();
        assert!(err.to_string().contains("does not accept story"));
    }

    #[test]
    fn test_ready_variant_is_immutable() {
        let key = VariantKey::default_for(Platform::TikTok);
        let mut variant = TransformedVariant::pre_validated(key, "https://cdn.example/v.mp4");
        variant.mark_failed();
        variant.begin_validation();
        variant.record_probes(3, Utc::now());
        variant.set_thumbnail(Some("https://cdn.example/t.jpg".to_string()));

        assert_eq!(variant.state(), VariantState::Ready);
        assert_eq!(variant.attempts(), 0);
        assert_eq!(variant.thumbnail_url(), None);
    }
}
