//! In-memory transcoding service for tests
//!
//! Every delivery URL is ready on the first probe unless a script says
//! otherwise.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use super::{MediaMeta, ProbeOutcome, TranscodingService, TransformProfile, UploadedSource};
use crate::error::{CastError, Result, TransformError};

#[derive(Default)]
struct MockState {
    uploads: usize,
    probes: Vec<String>,
    scripts: HashMap<String, VecDeque<ProbeOutcome>>,
    never_ready: bool,
    fail_probes: bool,
    upload_error: Option<String>,
}

pub struct MockTranscoder {
    public_id: String,
    meta: MediaMeta,
    state: Mutex<MockState>,
}

impl MockTranscoder {
    pub fn new(public_id: impl Into<String>) -> Self {
        Self {
            public_id: public_id.into(),
            meta: MediaMeta {
                duration_secs: Some(15.0),
                width: Some(1080),
                height: Some(1920),
                size_bytes: 1024,
            },
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_meta(mut self, meta: MediaMeta) -> Self {
        self.meta = meta;
        self
    }

    /// URL the mock derives for a transformation string
    pub fn url_for(&self, public_id: &str, transformation: &str, extension: &str) -> String {
        format!(
            "https://mock.transcoder/video/upload/{}/{}.{}",
            transformation, public_id, extension
        )
    }

    /// Answers for successive probes of `url`; once drained the URL is ready
    pub fn script(&self, url: &str, outcomes: Vec<ProbeOutcome>) {
        self.lock().scripts.insert(url.to_string(), outcomes.into());
    }

    /// Every probe answers 423
    pub fn never_ready(&self) {
        self.lock().never_ready = true;
    }

    /// Every probe fails at the transport level
    pub fn fail_probes(&self) {
        self.lock().fail_probes = true;
    }

    pub fn fail_upload(&self, message: impl Into<String>) {
        self.lock().upload_error = Some(message.into());
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probes.len()
    }

    pub fn probed_urls(&self) -> Vec<String> {
        self.lock().probes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TranscodingService for MockTranscoder {
    async fn upload(&self, _source: &Path) -> Result<UploadedSource> {
        let mut state = self.lock();
        if let Some(message) = &state.upload_error {
            return Err(TransformError::UploadFailed(message.clone()).into());
        }
        state.uploads += 1;
        Ok(UploadedSource {
            public_id: self.public_id.clone(),
            meta: self.meta.clone(),
        })
    }

    fn delivery_url(&self, public_id: &str, profile: &TransformProfile) -> String {
        self.url_for(public_id, &profile.transformation(), profile.format)
    }

    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        let mut state = self.lock();
        state.probes.push(url.to_string());
        if state.fail_probes {
            return Err(CastError::Network("connection reset".to_string()));
        }
        if state.never_ready {
            return Ok(ProbeOutcome::NotReady(423));
        }
        Ok(state
            .scripts
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ProbeOutcome::Ready))
    }
}
