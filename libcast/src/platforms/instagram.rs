//! Instagram via the Facebook Graph API
//!
//! Publishing is two-phase: a media container is created from the variant
//! URL, Instagram fetches and processes it, and once its `status_code` is
//! `FINISHED` the container is published with `media_publish`.
//!
//! Tokens from the login dialog are short-lived and must be elevated through
//! the broker before use.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{http, AuthorizationRequest, JobHandle, PlatformAdapter, PublishReceipt, RemoteStatus};
use crate::config::InstagramConfig;
use crate::error::{CastError, ConfigError, PublishError, RemoteError, Result};
use crate::publish::CompletionKind;
use crate::transform::TransformedVariant;
use crate::types::{AccountSummary, ContentType, Platform, PlatformCredential};

const SCOPES: &[&str] = &[
    "instagram_basic",
    "pages_show_list",
    "pages_read_engagement",
    "business_management",
    "instagram_content_publish",
    "instagram_manage_comments",
    "instagram_manage_insights",
];

pub struct InstagramAdapter {
    config: InstagramConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    instagram_business_account: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    data: Vec<MeResponse>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    account_type: Option<String>,
    #[serde(default)]
    profile_picture_url: Option<String>,
    #[serde(default)]
    followers_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    #[serde(default)]
    permalink: Option<String>,
}

impl InstagramAdapter {
    pub fn new(config: InstagramConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_root(), path.trim_start_matches('/'))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        fields: &str,
        access_token: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(self.endpoint(path))
            .query(&[("fields", fields), ("access_token", access_token)])
            .send()
            .await?;
        http::json(Platform::Instagram, response).await
    }

    /// Instagram business account linked to the Facebook user
    ///
    /// Looks at the user first and falls back to the pages they manage.
    async fn business_account(&self, access_token: &str) -> Result<(String, Option<String>)> {
        let me: MeResponse = self
            .get("me", "id,name,instagram_business_account", access_token)
            .await?;
        if let Some(account) = me.instagram_business_account {
            return Ok((account.id, me.name));
        }

        tracing::debug!("No Instagram account on the user, checking pages");
        let pages: PagesResponse = self
            .get("me/accounts", "id,name,instagram_business_account", access_token)
            .await?;
        pages
            .data
            .into_iter()
            .find_map(|page| page.instagram_business_account.map(|a| (a.id, page.name)))
            .ok_or_else(|| {
                RemoteError::new(
                    Platform::Instagram,
                    "No Instagram Business account is linked to this Facebook user",
                )
                .into()
            })
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn required_scopes(&self) -> Vec<String> {
        SCOPES.iter().map(|s| s.to_string()).collect()
    }

    fn authorization_request(&self, state: &str) -> Result<AuthorizationRequest> {
        if self.config.app_id.is_empty() {
            return Err(ConfigError::MissingField("instagram.app_id".to_string()).into());
        }
        let base = format!(
            "{}/{}/dialog/oauth",
            self.config.dialog_base.trim_end_matches('/'),
            self.config.api_version
        );
        let scope = SCOPES.join(",");
        let url = Url::parse_with_params(
            &base,
            &[
                ("client_id", self.config.app_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("response_type", "code"),
                ("state", state),
            ],
        )
        .map_err(|e| CastError::InvalidInput(format!("Invalid Instagram dialog URL: {}", e)))?;
        Ok(AuthorizationRequest {
            url,
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    fn requires_elevation(&self) -> bool {
        true
    }

    async fn account_summary(&self, access_token: &str) -> Result<AccountSummary> {
        let (account_id, page_name) = self.business_account(access_token).await?;
        let profile: ProfileResponse = self
            .get(
                &account_id,
                "id,username,account_type,profile_picture_url,followers_count",
                access_token,
            )
            .await?;

        let display_name = profile
            .username
            .clone()
            .or(page_name)
            .unwrap_or_else(|| profile.id.clone());
        Ok(AccountSummary {
            account_id: profile.id,
            display_name,
            username: profile.username,
            account_type: profile.account_type,
            avatar_url: profile.profile_picture_url,
            follower_count: profile.followers_count,
        })
    }

    async fn create_publish_job(
        &self,
        credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        content_type: ContentType,
    ) -> Result<JobHandle> {
        let media_type = match content_type {
            ContentType::Reel => "REELS",
            ContentType::Story => "STORIES",
            other => {
                return Err(PublishError::Unsupported(format!(
                    "Instagram cannot publish {} content",
                    other
                ))
                .into())
            }
        };

        let mut form = vec![
            ("media_type", media_type),
            ("video_url", variant.url()),
            ("access_token", credential.access_token.as_str()),
        ];
        // stories carry no caption
        if content_type == ContentType::Reel && !caption.is_empty() {
            form.push(("caption", caption));
        }

        tracing::debug!("Creating Instagram {} container", media_type);
        let response = self
            .client
            .post(self.endpoint(&format!("{}/media", credential.account_id)))
            .form(&form)
            .send()
            .await?;
        let created: IdRef = http::json(Platform::Instagram, response).await?;
        tracing::info!("Instagram container {} created", created.id);

        Ok(JobHandle::Container {
            container_id: created.id,
            account_id: credential.account_id.clone(),
        })
    }

    async fn poll_job(
        &self,
        credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<RemoteStatus> {
        let JobHandle::Container { container_id, .. } = handle else {
            return Err(PublishError::Unsupported(format!(
                "Instagram cannot poll {}",
                handle.remote_id()
            ))
            .into());
        };

        let status: ContainerStatus = self
            .get(container_id, "status_code,status", &credential.access_token)
            .await?;
        let code = status.status_code.unwrap_or_default();
        match code.as_str() {
            "FINISHED" | "PUBLISHED" => Ok(RemoteStatus::Finished),
            "IN_PROGRESS" | "" => Ok(RemoteStatus::InProgress),
            other => Ok(RemoteStatus::Failed(
                RemoteError::new(
                    Platform::Instagram,
                    status
                        .status
                        .unwrap_or_else(|| format!("Container status {}", other)),
                )
                .with_code(other),
            )),
        }
    }

    async fn finalize(
        &self,
        credential: &PlatformCredential,
        handle: &JobHandle,
    ) -> Result<PublishReceipt> {
        let JobHandle::Container {
            container_id,
            account_id,
        } = handle
        else {
            return Err(PublishError::Unsupported(format!(
                "Instagram cannot finalize {}",
                handle.remote_id()
            ))
            .into());
        };

        let response = self
            .client
            .post(self.endpoint(&format!("{}/media_publish", account_id)))
            .form(&[
                ("creation_id", container_id.as_str()),
                ("access_token", credential.access_token.as_str()),
            ])
            .send()
            .await?;
        let published: IdRef = http::json(Platform::Instagram, response).await?;

        let permalink = match self
            .get::<PermalinkResponse>(&published.id, "permalink", &credential.access_token)
            .await
        {
            Ok(p) => p.permalink,
            Err(e) => {
                tracing::debug!("Could not fetch permalink for {}: {}", published.id, e);
                None
            }
        };

        Ok(PublishReceipt {
            remote_id: published.id,
            permalink,
            completion_kind: CompletionKind::Published,
        })
    }

    async fn disconnect(&self, credential: &PlatformCredential) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint("me/permissions"))
            .query(&[("access_token", credential.access_token.as_str())])
            .send()
            .await?;
        http::check(Platform::Instagram, response).await?;
        Ok(())
    }
}
