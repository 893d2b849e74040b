//! Core types shared across the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CastError;

/// A supported publishing platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    YouTube,
    TikTok,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::YouTube, Platform::TikTok];

    /// Lowercase name, also the persisted key prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
        }
    }

    /// Persisted key for a field, e.g. `instagram_access_token`
    pub fn key(&self, field: &str) -> String {
        format!("{}_{}", self.as_str(), field)
    }

    /// Prefix every persisted key of this platform starts with
    pub fn key_prefix(&self) -> String {
        format!("{}_", self.as_str())
    }

    /// Uppercase tag used by auth completion messages (`INSTAGRAM_AUTH_SUCCESS`)
    pub fn message_tag(&self) -> &'static str {
        match self {
            Platform::Instagram => "INSTAGRAM",
            Platform::YouTube => "YOUTUBE",
            Platform::TikTok => "TIKTOK",
        }
    }

    /// Content type produced for this platform when none is requested explicitly
    pub fn default_content_type(&self) -> ContentType {
        match self {
            Platform::Instagram => ContentType::Reel,
            Platform::YouTube => ContentType::Short,
            Platform::TikTok => ContentType::TikTokVideo,
        }
    }

    pub fn supports(&self, content_type: ContentType) -> bool {
        matches!(
            (self, content_type),
            (Platform::Instagram, ContentType::Reel)
                | (Platform::Instagram, ContentType::Story)
                | (Platform::YouTube, ContentType::Short)
                | (Platform::TikTok, ContentType::TikTokVideo)
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Platform::Instagram),
            "youtube" | "yt" => Ok(Platform::YouTube),
            "tiktok" | "tt" => Ok(Platform::TikTok),
            other => Err(CastError::InvalidInput(format!(
                "Unknown platform '{}'. Valid options: instagram, youtube, tiktok",
                other
            ))),
        }
    }
}

/// Parse a comma separated platform list such as `instagram,youtube`
pub fn parse_platform_list(input: &str) -> Result<BTreeSet<Platform>, CastError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Platform::from_str)
        .collect()
}

/// Kind of content a variant is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Reel,
    Story,
    Short,
    #[serde(rename = "tiktok-video")]
    TikTokVideo,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Reel => "reel",
            ContentType::Story => "story",
            ContentType::Short => "short",
            ContentType::TikTokVideo => "tiktok-video",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reel" | "reels" => Ok(ContentType::Reel),
            "story" | "stories" => Ok(ContentType::Story),
            "short" | "shorts" => Ok(ContentType::Short),
            "tiktok-video" | "tiktok" | "video" => Ok(ContentType::TikTokVideo),
            other => Err(CastError::InvalidInput(format!(
                "Unknown content type '{}'. Valid options: reel, story, short, tiktok-video",
                other
            ))),
        }
    }
}

/// Identifies one rendition of an asset: a platform plus the content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub platform: Platform,
    pub content_type: ContentType,
}

impl VariantKey {
    pub fn new(platform: Platform, content_type: ContentType) -> Self {
        Self {
            platform,
            content_type,
        }
    }

    /// The platform's default rendition
    pub fn default_for(platform: Platform) -> Self {
        Self::new(platform, platform.default_content_type())
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.content_type)
    }
}

/// Connection status of a platform credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Invalid,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Disconnected => "disconnected",
            CredentialStatus::Connecting => "connecting",
            CredentialStatus::Connected => "connected",
            CredentialStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(CredentialStatus::Disconnected),
            "connecting" => Ok(CredentialStatus::Connecting),
            "connected" => Ok(CredentialStatus::Connected),
            "invalid" => Ok(CredentialStatus::Invalid),
            other => Err(CastError::InvalidInput(format!(
                "Unknown credential status '{}'",
                other
            ))),
        }
    }
}

/// An authorized account on one platform
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCredential {
    pub platform: Platform,
    pub account_id: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Some platforms never tell the client when a token expires
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: BTreeSet<String>,
    pub status: CredentialStatus,
}

impl PlatformCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// Tokens stay out of debug output and therefore out of logs.
impl fmt::Debug for PlatformCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredential")
            .field("platform", &self.platform)
            .field("account_id", &self.account_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("status", &self.status)
            .finish()
    }
}

/// Remote account identity and profile details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub display_name: String,
    pub username: Option<String>,
    pub account_type: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: Option<u64>,
}

/// Why a connect attempt ended without a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    PopupBlocked,
    Cancelled,
    TimedOut,
    /// The provider reported an authorization error
    Denied(String),
    /// Token exchange, elevation or account lookup failed
    Failed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PopupBlocked => f.write_str("popup blocked"),
            DisconnectReason::Cancelled => f.write_str("cancelled"),
            DisconnectReason::TimedOut => f.write_str("timed out"),
            DisconnectReason::Denied(msg) => write!(f, "denied: {}", msg),
            DisconnectReason::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Result of `connect`, shared by every caller of the same in-flight attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub platform: Platform,
    pub status: CredentialStatus,
    pub credential: Option<PlatformCredential>,
    pub reason: Option<DisconnectReason>,
}

impl ConnectOutcome {
    pub fn connected(credential: PlatformCredential) -> Self {
        Self {
            platform: credential.platform,
            status: CredentialStatus::Connected,
            credential: Some(credential),
            reason: None,
        }
    }

    pub fn failed(platform: Platform, status: CredentialStatus, reason: DisconnectReason) -> Self {
        Self {
            platform,
            status,
            credential: None,
            reason: Some(reason),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == CredentialStatus::Connected
    }
}
