//! Cast - upload one video, publish it everywhere
//!
//! This library holds the multi-platform publish orchestrator: per-platform
//! credential lifecycle, media transform tracking against a remote
//! transcoding service, and a publish state machine that drives Instagram,
//! YouTube and TikTok through their different publish protocols.

pub mod broker;
pub mod callback;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod publish;
pub mod service;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::CredentialStore;
pub use error::{CastError, Result};
pub use lifecycle::CredentialLifecycleManager;
pub use publish::{CompletionKind, PublishJob, PublishState};
pub use service::{CastService, PublishOutcome, PublishReport};
pub use transform::{MediaAsset, TransformedVariant, VariantState};
pub use types::{
    ConnectOutcome, ContentType, CredentialStatus, DisconnectReason, Platform, PlatformCredential,
    VariantKey,
};
