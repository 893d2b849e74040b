//! TikTok via the Content Posting API
//!
//! Videos go to the creator's inbox with `PULL_FROM_URL`: TikTok downloads
//! the variant itself and the user finishes the post (caption, privacy) in
//! the app. Acceptance is reported as
//! [`CompletionKind::AwaitingUserAction`](crate::publish::CompletionKind::AwaitingUserAction).
//!
//! Every response carries an `error` object; `code == "ok"` means success.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

use super::{http, AuthorizationRequest, JobHandle, PlatformAdapter};
use crate::broker::TokenBroker;
use crate::config::TikTokConfig;
use crate::error::{CastError, ConfigError, PublishError, RemoteError, Result};
use crate::transform::TransformedVariant;
use crate::types::{AccountSummary, ContentType, Platform, PlatformCredential};

const SCOPES: &[&str] = &[
    "user.info.basic",
    "user.info.profile",
    "user.info.stats",
    "video.upload",
    "video.publish",
    "video.list",
];

pub struct TikTokAdapter {
    config: TikTokConfig,
    client: Client,
    broker: Arc<dyn TokenBroker>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    log_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    error: ApiStatus,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    open_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    follower_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
}

/// Unwrap `data`, turning a non-`ok` status into a [`RemoteError`]
fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    let status = envelope.error;
    if !status.code.is_empty() && status.code != "ok" {
        let mut error = RemoteError::new(Platform::TikTok, status.message).with_code(status.code);
        if let Some(log_id) = status.log_id {
            error = error.with_body(format!("log_id={}", log_id));
        }
        return Err(error.into());
    }
    envelope.data.ok_or_else(|| {
        CastError::from(RemoteError::new(
            Platform::TikTok,
            "Response did not include data",
        ))
    })
}

impl TikTokAdapter {
    pub fn new(config: TikTokConfig, client: Client, broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            config,
            client,
            broker,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn required_scopes(&self) -> Vec<String> {
        SCOPES.iter().map(|s| s.to_string()).collect()
    }

    fn authorization_request(&self, state: &str) -> Result<AuthorizationRequest> {
        if self.config.client_key.is_empty() {
            return Err(ConfigError::MissingField("tiktok.client_key".to_string()).into());
        }
        let scope = SCOPES.join(",");
        let url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_key", self.config.client_key.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| CastError::InvalidInput(format!("Invalid TikTok auth URL: {}", e)))?;
        Ok(AuthorizationRequest {
            url,
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    async fn account_summary(&self, access_token: &str) -> Result<AccountSummary> {
        let response = self
            .client
            .get(self.endpoint("/v2/user/info/"))
            .query(&[(
                "fields",
                "open_id,union_id,avatar_url,display_name,follower_count",
            )])
            .bearer_auth(access_token)
            .send()
            .await?;
        let envelope: Envelope<UserData> = http::json(Platform::TikTok, response).await?;
        let user = unwrap_envelope(envelope)?.user;

        Ok(AccountSummary {
            display_name: user
                .display_name
                .clone()
                .unwrap_or_else(|| user.open_id.clone()),
            username: user.display_name,
            account_type: None,
            avatar_url: user.avatar_url,
            follower_count: user.follower_count,
            account_id: user.open_id,
        })
    }

    async fn create_publish_job(
        &self,
        credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        content_type: ContentType,
    ) -> Result<JobHandle> {
        if content_type != ContentType::TikTokVideo {
            return Err(PublishError::Unsupported(format!(
                "TikTok cannot publish {} content",
                content_type
            ))
            .into());
        }
        if !caption.is_empty() {
            tracing::debug!("TikTok inbox uploads take no caption; the user adds it in the app");
        }

        let response = self
            .client
            .post(self.endpoint("/v2/post/publish/inbox/video/init/"))
            .bearer_auth(&credential.access_token)
            .json(&json!({
                "source_info": {
                    "source": "PULL_FROM_URL",
                    "video_url": variant.url(),
                }
            }))
            .send()
            .await?;
        let envelope: Envelope<InitData> = http::json(Platform::TikTok, response).await?;
        let init = unwrap_envelope(envelope)?;
        tracing::info!("TikTok accepted upload {}", init.publish_id);

        Ok(JobHandle::InboxTicket {
            publish_id: init.publish_id,
        })
    }

    async fn disconnect(&self, credential: &PlatformCredential) -> Result<()> {
        self.broker
            .revoke(Platform::TikTok, &credential.access_token)
            .await
    }
}
