//! Event bus for orchestrator progress
//!
//! The orchestrator owns one [`EventBus`] and every component reports through
//! it: credential transitions, transform progress and publish job progress.
//! External listeners (a CLI progress line, a UI) subscribe; they never read
//! component internals.
//!
//! Emitting never blocks. With no subscribers the event is dropped, and a
//! lagging subscriber loses the oldest events first.
//!
//! # Example
//!
//! ```no_run
//! use libcast::service::events::{Event, EventBus};
//! use libcast::types::{CredentialStatus, Platform};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::CredentialChanged {
//!     platform: Platform::YouTube,
//!     status: CredentialStatus::Connected,
//!     reason: None,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::PublishError;
use crate::publish::{CompletionKind, PublishState};
use crate::types::{ContentType, CredentialStatus, DisconnectReason, Platform, VariantKey};

pub type EventReceiver = broadcast::Receiver<Event>;

/// Broadcast channel wrapper shared by all components
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A platform credential changed status
    CredentialChanged {
        platform: Platform,
        status: CredentialStatus,
        /// Set when a connect attempt ended without a credential
        reason: Option<DisconnectReason>,
    },

    /// Source uploaded, variants are being derived
    TransformStarted {
        source_id: String,
        targets: Vec<VariantKey>,
    },

    /// A variant reached `ready`
    VariantReady {
        source_id: String,
        platform: Platform,
        content_type: ContentType,
        url: String,
        /// False when the probe ceiling was hit and the variant was let through
        validated: bool,
        attempts: u32,
    },

    /// A publish job changed state or progress
    PublishProgress {
        job_id: Uuid,
        platform: Platform,
        content_type: ContentType,
        state: PublishState,
        progress: u8,
    },

    /// A publish job reached COMPLETE or ERROR
    PublishFinished {
        job_id: Uuid,
        platform: Platform,
        content_type: ContentType,
        state: PublishState,
        completion_kind: Option<CompletionKind>,
        permalink: Option<String>,
        error: Option<PublishError>,
    },
}

impl Event {
    /// Platform the event concerns, if it concerns a single one
    pub fn platform(&self) -> Option<Platform> {
        match self {
            Event::CredentialChanged { platform, .. }
            | Event::VariantReady { platform, .. }
            | Event::PublishProgress { platform, .. }
            | Event::PublishFinished { platform, .. } => Some(*platform),
            Event::TransformStarted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.emit(Event::CredentialChanged {
            platform: Platform::TikTok,
            status: CredentialStatus::Disconnected,
            reason: Some(DisconnectReason::Cancelled),
        });

        match receiver.recv().await.unwrap() {
            Event::CredentialChanged {
                platform,
                status,
                reason,
            } => {
                assert_eq!(platform, Platform::TikTok);
                assert_eq!(status, CredentialStatus::Disconnected);
                assert_eq!(reason, Some(DisconnectReason::Cancelled));
            }
            other => panic!("Wrong event received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(Event::PublishProgress {
            job_id,
            platform: Platform::Instagram,
            content_type: ContentType::Reel,
            state: PublishState::Waiting,
            progress: 42,
        });

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                Event::PublishProgress { job_id: id, progress, .. } => {
                    assert_eq!(id, job_id);
                    assert_eq!(progress, 42);
                }
                other => panic!("Wrong event received: {:?}", other),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        bus.emit(Event::TransformStarted {
            source_id: "abc".to_string(),
            targets: vec![VariantKey::default_for(Platform::YouTube)],
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_keeps_error_payload() {
        let remote = RemoteError::new(Platform::Instagram, "Media upload has failed")
            .with_status(400)
            .with_code("2207026");
        let event = Event::PublishFinished {
            job_id: Uuid::nil(),
            platform: Platform::Instagram,
            content_type: ContentType::Reel,
            state: PublishState::Error,
            completion_kind: None,
            permalink: None,
            error: Some(PublishError::RemoteStatusError(remote.clone())),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"publish_finished\""));
        assert!(json.contains("2207026"));

        match serde_json::from_str::<Event>(&json).unwrap() {
            Event::PublishFinished { error, state, .. } => {
                assert_eq!(state, PublishState::Error);
                assert_eq!(error, Some(PublishError::RemoteStatusError(remote)));
            }
            other => panic!("Deserialization failed: {:?}", other),
        }
    }

    #[test]
    fn test_event_platform() {
        let event = Event::VariantReady {
            source_id: "abc".to_string(),
            platform: Platform::YouTube,
            content_type: ContentType::Short,
            url: "https://res.cloudinary.com/demo/video/upload/abc.mp4".to_string(),
            validated: true,
            attempts: 1,
        };
        assert_eq!(event.platform(), Some(Platform::YouTube));
    }
}
