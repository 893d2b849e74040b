//! Publish State Machine
//!
//! One [`PublishMachine`] run drives a single (platform, content type) job:
//!
//! ```text
//! CREATING ──► WAITING ──► PUBLISHING ──► COMPLETE
//!     │           │             │
//!     └───────────┴─────────────┴──────► ERROR
//! ```
//!
//! The adapter decides which states apply. A container handle goes through
//! every state. An immediate receipt or an inbox ticket jumps from CREATING
//! straight to COMPLETE. Callers see the same [`PublishJob`] either way.
//!
//! WAITING has no attempt ceiling; only the cancellation token ends it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CastError, PublishError, RemoteError};
use crate::platforms::{JobHandle, PlatformAdapter, PublishReceipt, RemoteStatus};
use crate::service::events::{Event, EventBus};
use crate::transform::TransformedVariant;
use crate::types::{ContentType, CredentialStatus, Platform, PlatformCredential};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Creating,
    Waiting,
    Publishing,
    Complete,
    Error,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Complete | PublishState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishState::Creating => "CREATING",
            PublishState::Waiting => "WAITING",
            PublishState::Publishing => "PUBLISHING",
            PublishState::Complete => "COMPLETE",
            PublishState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What COMPLETE means for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Publicly live
    Published,
    /// Accepted; the user finishes the post on the platform
    AwaitingUserAction,
}

const PROGRESS_CREATING: u8 = 20;
const PROGRESS_WAITING_BASE: u8 = 40;
const PROGRESS_WAITING_MAX: u8 = 80;
const PROGRESS_PUBLISHING: u8 = 90;
const PROGRESS_COMPLETE: u8 = 100;

/// UI estimate of how far along a WAITING job is after `polls` polls
pub fn waiting_progress(polls: u32) -> u8 {
    let step = polls.saturating_mul(2).min(u8::MAX as u32) as u8;
    PROGRESS_WAITING_BASE
        .saturating_add(step)
        .min(PROGRESS_WAITING_MAX)
}

/// One publish attempt; never retried, a new attempt is a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: Uuid,
    pub platform: Platform,
    pub content_type: ContentType,
    /// Only set for container-based platforms
    pub remote_container_id: Option<String>,
    pub state: PublishState,
    pub progress: u8,
    pub error: Option<PublishError>,
    pub completion_kind: Option<CompletionKind>,
    pub remote_id: Option<String>,
    pub permalink: Option<String>,
    /// Every state visited, in order
    pub history: Vec<PublishState>,
    pub polls: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishJob {
    pub fn new(platform: Platform, content_type: ContentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            platform,
            content_type,
            remote_container_id: None,
            state: PublishState::Creating,
            progress: PROGRESS_CREATING,
            error: None,
            completion_kind: None,
            remote_id: None,
            permalink: None,
            history: vec![PublishState::Creating],
            polls: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn visited(&self, state: PublishState) -> bool {
        self.history.contains(&state)
    }

    pub fn is_complete(&self) -> bool {
        self.state == PublishState::Complete
    }
}

/// Drives jobs through their states
pub struct PublishMachine {
    poll_interval: Duration,
    events: EventBus,
}

impl PublishMachine {
    pub fn new(poll_interval: Duration, events: EventBus) -> Self {
        Self {
            poll_interval,
            events,
        }
    }

    /// Run a job to COMPLETE or ERROR
    ///
    /// The credential and variant are checked once, when CREATING begins. A
    /// job that fails the check ends in ERROR without contacting the
    /// platform.
    pub async fn run(
        &self,
        adapter: Arc<dyn PlatformAdapter>,
        credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        content_type: ContentType,
        cancel: &CancellationToken,
    ) -> PublishJob {
        let mut job = PublishJob::new(adapter.platform(), content_type);
        tracing::info!(job_id = %job.id, "Publishing {} to {}", content_type, job.platform);
        self.progress(&job);

        if let Err(reason) = check_preconditions(adapter.platform(), credential, variant) {
            return self.fail(job, PublishError::PreconditionFailed(reason));
        }

        let handle = tokio::select! {
            _ = cancel.cancelled() => return self.fail(job, PublishError::Cancelled),
            result = adapter.create_publish_job(credential, variant, caption, content_type) => result,
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                let error = into_publish_error(job.platform, e, PublishError::ContainerCreateFailed);
                return self.fail(job, error);
            }
        };
        job.remote_id = Some(handle.remote_id().to_string());

        match handle {
            JobHandle::Immediate(receipt) => self.complete(job, receipt),
            JobHandle::InboxTicket { publish_id } => {
                let receipt = PublishReceipt {
                    remote_id: publish_id,
                    permalink: None,
                    completion_kind: CompletionKind::AwaitingUserAction,
                };
                self.complete(job, receipt)
            }
            JobHandle::Container { .. } => {
                job.remote_container_id = Some(handle.remote_id().to_string());
                self.drive_container(job, adapter.as_ref(), credential, &handle, cancel)
                    .await
            }
        }
    }

    async fn drive_container(
        &self,
        mut job: PublishJob,
        adapter: &dyn PlatformAdapter,
        credential: &PlatformCredential,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> PublishJob {
        self.transition(&mut job, PublishState::Waiting, waiting_progress(0));

        loop {
            let status = tokio::select! {
                _ = cancel.cancelled() => return self.fail(job, PublishError::Cancelled),
                status = adapter.poll_job(credential, handle) => status,
            };
            job.polls += 1;

            match status {
                Ok(RemoteStatus::Finished) => break,
                Ok(RemoteStatus::Failed(remote)) => {
                    return self.fail(job, PublishError::RemoteStatusError(remote));
                }
                Ok(RemoteStatus::InProgress) => {
                    tracing::debug!(job_id = %job.id, "Container still processing (poll {})", job.polls);
                }
                Err(CastError::Network(message)) => {
                    tracing::warn!(job_id = %job.id, "Status poll failed, retrying: {}", message);
                }
                Err(e) => {
                    let error = into_publish_error(job.platform, e, PublishError::RemoteStatusError);
                    return self.fail(job, error);
                }
            }

            job.updated_at = Utc::now();
            let progress = waiting_progress(job.polls);
            if progress > job.progress {
                job.progress = progress;
                self.progress(&job);
            }

            tokio::select! {
                _ = cancel.cancelled() => return self.fail(job, PublishError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.transition(&mut job, PublishState::Publishing, PROGRESS_PUBLISHING);
        let receipt = tokio::select! {
            _ = cancel.cancelled() => return self.fail(job, PublishError::Cancelled),
            receipt = adapter.finalize(credential, handle) => receipt,
        };
        match receipt {
            Ok(receipt) => self.complete(job, receipt),
            Err(e) => {
                let error = into_publish_error(job.platform, e, PublishError::FinalizeRejected);
                self.fail(job, error)
            }
        }
    }

    fn transition(&self, job: &mut PublishJob, state: PublishState, progress: u8) {
        tracing::debug!(job_id = %job.id, "{} -> {}", job.state, state);
        job.state = state;
        job.progress = progress;
        job.history.push(state);
        job.updated_at = Utc::now();
        self.progress(job);
    }

    fn complete(&self, mut job: PublishJob, receipt: PublishReceipt) -> PublishJob {
        job.remote_id = Some(receipt.remote_id);
        job.permalink = receipt.permalink;
        job.completion_kind = Some(receipt.completion_kind);
        self.transition(&mut job, PublishState::Complete, PROGRESS_COMPLETE);
        match receipt.completion_kind {
            CompletionKind::Published => {
                tracing::info!(job_id = %job.id, "Published to {}", job.platform)
            }
            CompletionKind::AwaitingUserAction => tracing::info!(
                job_id = %job.id,
                "{} accepted the upload; finish the post in the app",
                job.platform
            ),
        }
        self.finished(&job);
        job
    }

    fn fail(&self, mut job: PublishJob, error: PublishError) -> PublishJob {
        tracing::warn!(job_id = %job.id, "Publish to {} failed: {}", job.platform, error);
        job.error = Some(error);
        let progress = job.progress;
        self.transition(&mut job, PublishState::Error, progress);
        self.finished(&job);
        job
    }

    fn progress(&self, job: &PublishJob) {
        self.events.emit(Event::PublishProgress {
            job_id: job.id,
            platform: job.platform,
            content_type: job.content_type,
            state: job.state,
            progress: job.progress,
        });
    }

    fn finished(&self, job: &PublishJob) {
        self.events.emit(Event::PublishFinished {
            job_id: job.id,
            platform: job.platform,
            content_type: job.content_type,
            state: job.state,
            completion_kind: job.completion_kind,
            permalink: job.permalink.clone(),
            error: job.error.clone(),
        });
    }
}

fn check_preconditions(
    platform: Platform,
    credential: &PlatformCredential,
    variant: &TransformedVariant,
) -> std::result::Result<(), String> {
    if credential.platform != platform || variant.platform() != platform {
        return Err(format!(
            "credential ({}) and variant ({}) do not belong to {}",
            credential.platform,
            variant.platform(),
            platform
        ));
    }
    if credential.status != CredentialStatus::Connected {
        return Err(format!("{} credential is {}", platform, credential.status));
    }
    if !variant.is_ready() {
        return Err(format!("{} variant is not ready", variant.key()));
    }
    Ok(())
}

/// Keep the remote payload when there is one, otherwise describe the failure
fn into_publish_error(
    platform: Platform,
    error: CastError,
    wrap: fn(RemoteError) -> PublishError,
) -> PublishError {
    match error {
        CastError::Publish(publish) => publish,
        CastError::Remote(remote) => wrap(remote),
        other => wrap(RemoteError::new(platform, other.to_string())),
    }
}
