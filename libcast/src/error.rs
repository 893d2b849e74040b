//! Error types for Cast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, CastError>;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Platform rejected request: {0}")]
    Remote(RemoteError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CastError::InvalidInput(_) => 3,
            CastError::Auth(_) => 2,
            CastError::Remote(remote) if remote.is_auth_rejection() => 2,
            _ => 1,
        }
    }

    /// True when the platform refused the credential itself rather than the request
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            CastError::Auth(AuthError::TokenRejected(_)) => true,
            CastError::Remote(remote) => remote.is_auth_rejection(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CastError {
    fn from(err: reqwest::Error) -> Self {
        CastError::Network(err.to_string())
    }
}

impl From<RemoteError> for CastError {
    fn from(err: RemoteError) -> Self {
        CastError::Remote(err)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential serialization error: {0}")]
    Serialization(String),

    #[error("Token elevation failed: {0}")]
    ElevationFailed(String),

    #[error("Credential store error: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization window was blocked")]
    PopupBlocked,

    #[error("Authorization was cancelled by the user")]
    Cancelled,

    #[error("Authorization timed out after {0}s")]
    TimedOut(u64),

    #[error("Token rejected: {0}")]
    TokenRejected(String),

    #[error("Message from untrusted origin: {0}")]
    OriginMismatch(String),

    #[error("Authorization state did not match the request")]
    StateMismatch,

    #[error("Provider reported an error: {0}")]
    Provider(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Upload to transcoding service failed: {0}")]
    UploadFailed(String),

    #[error("Variant at {url} not confirmed after {attempts} attempts")]
    ValidationExhausted { attempts: u32, url: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PublishError {
    #[error("Container creation failed: {0}")]
    ContainerCreateFailed(RemoteError),

    #[error("Remote processing failed: {0}")]
    RemoteStatusError(RemoteError),

    #[error("Finalize rejected: {0}")]
    FinalizeRejected(RemoteError),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Publish cancelled")]
    Cancelled,
}

/// A platform's own error report, kept as the platform sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub platform: Platform,
    /// HTTP status, absent for transport failures
    pub status: Option<u16>,
    /// Platform specific error code (Graph `code`, TikTok `code`, Google `reason`)
    pub code: Option<String>,
    pub message: String,
    /// Raw response body
    pub body: Option<String>,
}

impl RemoteError {
    pub fn new(platform: Platform, message: impl Into<String>) -> Self {
        Self {
            platform,
            status: None,
            code: None,
            message: message.into(),
            body: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether this error means the access token is no longer accepted
    ///
    /// Covers HTTP 401, Graph API code 190 (expired or revoked token) and
    /// TikTok's `access_token_invalid`.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status, Some(401))
            || matches!(
                self.code.as_deref(),
                Some("190") | Some("access_token_invalid") | Some("authError")
            )
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.platform, self.message)?;
        match (&self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, " (HTTP {}, code {})", status, code),
            (Some(status), None) => write!(f, " (HTTP {})", status),
            (None, Some(code)) => write!(f, " (code {})", code),
            (None, None) => Ok(()),
        }
    }
}
