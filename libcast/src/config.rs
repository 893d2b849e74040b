//! Configuration management for Cast
//!
//! Every section is optional; missing values fall back to defaults that
//! match the public platform endpoints. Durations are written in
//! humantime notation (`"5s"`, `"2m"`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub broker: BrokerConfig,
    pub transform: TransformConfig,
    pub publish: PublishConfig,
    pub instagram: InstagramConfig,
    pub youtube: YouTubeConfig,
    pub tiktok: TikTokConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.config/cast/credentials.json".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn expand_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Upper bound for one interactive connect flow
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    /// Origins whose completion messages are trusted
    pub allowed_origins: Vec<String>,
    /// Port of the loopback redirect listener
    pub redirect_port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            allowed_origins: vec![
                "http://127.0.0.1:8765".to_string(),
                "http://localhost:8000".to_string(),
            ],
            redirect_port: 8765,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the trusted backend holding the client secrets
    pub base_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_base: String,
    pub delivery_base: String,
    /// Delay before each availability probe; the last entry repeats
    #[serde(with = "duration_list")]
    pub probe_delays: Vec<Duration>,
    pub max_attempts: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            upload_preset: String::new(),
            api_base: "https://api.cloudinary.com/v1_1".to_string(),
            delivery_base: "https://res.cloudinary.com".to_string(),
            probe_delays: [1, 2, 3, 5, 8, 10]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_attempts: 6,
        }
    }
}

impl TransformConfig {
    /// Delay to wait before probe `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.probe_delays
            .get(index)
            .or_else(|| self.probe_delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstagramConfig {
    pub app_id: String,
    pub api_version: String,
    pub graph_base: String,
    pub dialog_base: String,
    pub redirect_uri: String,
    pub aspect_tolerance: f64,
    pub max_duration_secs: u32,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_version: "v21.0".to_string(),
            graph_base: "https://graph.facebook.com".to_string(),
            dialog_base: "https://www.facebook.com".to_string(),
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
            aspect_tolerance: 0.1,
            max_duration_secs: 90,
        }
    }
}

impl InstagramConfig {
    /// Versioned Graph API root, e.g. `https://graph.facebook.com/v21.0`
    pub fn graph_root(&self) -> String {
        format!("{}/{}", self.graph_base.trim_end_matches('/'), self.api_version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub api_base: String,
    pub upload_base: String,
    pub auth_url: String,
    pub revoke_url: String,
    pub default_title: String,
    pub aspect_tolerance: f64,
    pub max_duration_secs: u32,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/youtube/v3".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
            default_title: "My YouTube Short #Shorts".to_string(),
            aspect_tolerance: 0.1,
            max_duration_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TikTokConfig {
    pub client_key: String,
    pub redirect_uri: String,
    pub api_base: String,
    pub auth_url: String,
    pub default_title: String,
    pub aspect_tolerance: f64,
    pub max_duration_secs: u32,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            client_key: String::new(),
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
            api_base: "https://open.tiktokapis.com".to_string(),
            auth_url: "https://www.tiktok.com/v2/auth/authorize/".to_string(),
            default_title: "Posted via Cast".to_string(),
            aspect_tolerance: 0.2,
            max_duration_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Reject values that would make the pipelines misbehave
    pub fn validate(&self) -> Result<()> {
        if self.transform.max_attempts == 0 {
            return Err(invalid("transform.max_attempts", "must be at least 1"));
        }
        if self.transform.probe_delays.is_empty() {
            return Err(invalid("transform.probe_delays", "must not be empty"));
        }
        if self.publish.poll_interval.is_zero() {
            return Err(invalid("publish.poll_interval", "must be greater than zero"));
        }
        if self.auth.connect_timeout.is_zero() {
            return Err(invalid("auth.connect_timeout", "must be greater than zero"));
        }
        for (field, tolerance) in [
            ("instagram.aspect_tolerance", self.instagram.aspect_tolerance),
            ("youtube.aspect_tolerance", self.youtube.aspect_tolerance),
            ("tiktok.aspect_tolerance", self.tiktok.aspect_tolerance),
        ] {
            if !(0.0..1.0).contains(&tolerance) {
                return Err(invalid(field, "must be between 0.0 and 1.0"));
            }
        }
        Ok(())
    }

    /// Uploading needs a cloud and an unsigned preset
    pub fn require_transcoding(&self) -> Result<()> {
        if self.transform.cloud_name.is_empty() {
            return Err(ConfigError::MissingField("transform.cloud_name".to_string()).into());
        }
        if self.transform.upload_preset.is_empty() {
            return Err(ConfigError::MissingField("transform.upload_preset".to_string()).into());
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("cast").join("config.toml"))
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod duration_list {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(values: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&humantime::format_duration(*value).to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| humantime::parse_duration(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auth.connect_timeout, Duration::from_secs(120));
        assert_eq!(config.publish.poll_interval, Duration::from_secs(5));
        assert_eq!(config.transform.max_attempts, 6);
        assert_eq!(config.instagram.graph_root(), "https://graph.facebook.com/v21.0");
        assert_eq!(config.youtube.aspect_tolerance, 0.1);
        assert_eq!(config.tiktok.aspect_tolerance, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_ramp_repeats_last_entry() {
        let transform = TransformConfig::default();
        assert_eq!(transform.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(transform.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(transform.delay_for_attempt(6), Duration::from_secs(10));
        assert_eq!(transform.delay_for_attempt(9), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[transform]
cloud_name = "demo"
upload_preset = "unsigned"
probe_delays = ["500ms", "1s"]
max_attempts = 3

[publish]
poll_interval = "2s"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.transform.cloud_name, "demo");
        assert_eq!(
            config.transform.probe_delays,
            vec![Duration::from_millis(500), Duration::from_secs(1)]
        );
        assert_eq!(config.publish.poll_interval, Duration::from_secs(2));
        assert_eq!(config.instagram.api_version, "v21.0");
        assert!(config.require_transcoding().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[transform]\nmax_attempts = 0\n").unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("transform.max_attempts"));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[publish]\npoll_interval = \"soon\"\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_require_transcoding_reports_missing_field() {
        let err = Config::default().require_transcoding().unwrap_err();
        assert!(err.to_string().contains("transform.cloud_name"));
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("CAST_CONFIG", "/tmp/cast-test/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("CAST_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/cast-test/config.toml"));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("CAST_CONFIG", temp.path().join("absent.toml"));
        let config = Config::load().unwrap();
        std::env::remove_var("CAST_CONFIG");
        assert_eq!(config.transform.max_attempts, 6);
    }
}
