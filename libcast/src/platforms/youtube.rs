//! YouTube Shorts via the Data API v3
//!
//! Uploads are single-shot from our point of view: the rendered variant is
//! fetched, sent through a resumable upload session, and the video id comes
//! back in the final response. YouTube's own processing happens after that
//! and needs no polling to count as published.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{http, AuthorizationRequest, JobHandle, PlatformAdapter, PublishReceipt};
use crate::config::YouTubeConfig;
use crate::error::{CastError, ConfigError, PublishError, RemoteError, Result};
use crate::publish::CompletionKind;
use crate::transform::TransformedVariant;
use crate::types::{AccountSummary, ContentType, Platform, PlatformCredential};

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.readonly",
];

const TITLE_LIMIT: usize = 100;
const SHORTS_TAG: &str = "#Shorts";
/// Entertainment
const CATEGORY_ID: &str = "24";

/// Title for a Short: first caption line, tagged `#Shorts`, within YouTube's limit
pub fn shorts_title(caption: &str, default_title: &str) -> String {
    let first_line = caption.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return default_title.to_string();
    }
    if first_line.to_lowercase().contains("#shorts") {
        return first_line.chars().take(TITLE_LIMIT).collect();
    }
    let room = TITLE_LIMIT - SHORTS_TAG.len() - 1;
    let base: String = first_line.chars().take(room).collect();
    format!("{} {}", base.trim_end(), SHORTS_TAG)
}

pub struct YouTubeAdapter {
    config: YouTubeConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    custom_url: Option<String>,
    #[serde(default)]
    thumbnails: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    /// The API reports counts as strings
    #[serde(default)]
    subscriber_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

impl YouTubeAdapter {
    pub fn new(config: YouTubeConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let response = http::check(Platform::YouTube, response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn start_session(&self, access_token: &str, metadata: serde_json::Value, len: usize) -> Result<String> {
        let endpoint = format!("{}/videos", self.config.upload_base.trim_end_matches('/'));
        let response = self
            .client
            .post(endpoint)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(access_token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", len.to_string())
            .json(&metadata)
            .send()
            .await?;
        let response = http::check(Platform::YouTube, response).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::new(Platform::YouTube, "Upload session has no Location header").into()
            })
    }

    async fn set_thumbnail(&self, access_token: &str, video_id: &str, thumbnail_url: &str) -> Result<()> {
        let image = self.fetch_media(thumbnail_url).await?;
        let endpoint = format!("{}/thumbnails/set", self.config.upload_base.trim_end_matches('/'));
        let response = self
            .client
            .post(endpoint)
            .query(&[("videoId", video_id)])
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(image)
            .send()
            .await?;
        http::check(Platform::YouTube, response).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn required_scopes(&self) -> Vec<String> {
        SCOPES.iter().map(|s| s.to_string()).collect()
    }

    fn authorization_request(&self, state: &str) -> Result<AuthorizationRequest> {
        if self.config.client_id.is_empty() {
            return Err(ConfigError::MissingField("youtube.client_id".to_string()).into());
        }
        let scope = SCOPES.join(" ");
        let url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|e| CastError::InvalidInput(format!("Invalid YouTube auth URL: {}", e)))?;
        Ok(AuthorizationRequest {
            url,
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    async fn account_summary(&self, access_token: &str) -> Result<AccountSummary> {
        let endpoint = format!("{}/channels", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(endpoint)
            .query(&[("part", "snippet,statistics"), ("mine", "true")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let channels: ChannelList = http::json(Platform::YouTube, response).await?;
        let channel = channels.items.into_iter().next().ok_or_else(|| {
            CastError::from(RemoteError::new(
                Platform::YouTube,
                "No YouTube channel found for this account",
            ))
        })?;

        let snippet = channel.snippet;
        let avatar_url = snippet
            .as_ref()
            .and_then(|s| s.thumbnails.as_ref())
            .and_then(|t| t.pointer("/default/url"))
            .and_then(|u| u.as_str())
            .map(str::to_string);
        Ok(AccountSummary {
            display_name: snippet
                .as_ref()
                .map(|s| s.title.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| channel.id.clone()),
            username: snippet.and_then(|s| s.custom_url),
            account_type: Some("channel".to_string()),
            avatar_url,
            follower_count: channel
                .statistics
                .and_then(|s| s.subscriber_count)
                .and_then(|c| c.parse().ok()),
            account_id: channel.id,
        })
    }

    async fn create_publish_job(
        &self,
        credential: &PlatformCredential,
        variant: &TransformedVariant,
        caption: &str,
        content_type: ContentType,
    ) -> Result<JobHandle> {
        if content_type != ContentType::Short {
            return Err(PublishError::Unsupported(format!(
                "YouTube cannot publish {} content",
                content_type
            ))
            .into());
        }

        let video = self.fetch_media(variant.url()).await?;
        let title = shorts_title(caption, &self.config.default_title);
        let metadata = json!({
            "snippet": {
                "title": title,
                "description": caption,
                "categoryId": CATEGORY_ID,
            },
            "status": {
                "privacyStatus": "public",
                "selfDeclaredMadeForKids": false,
            },
        });

        let session = self
            .start_session(&credential.access_token, metadata, video.len())
            .await?;
        tracing::debug!("Uploading {} bytes to YouTube", video.len());
        let response = self
            .client
            .put(session)
            .bearer_auth(&credential.access_token)
            .header(CONTENT_TYPE, "video/mp4")
            .body(video)
            .send()
            .await?;
        let uploaded: UploadedVideo = http::json(Platform::YouTube, response).await?;
        tracing::info!("YouTube video {} uploaded", uploaded.id);

        if let Some(thumbnail) = variant.thumbnail_url() {
            if let Err(e) = self
                .set_thumbnail(&credential.access_token, &uploaded.id, thumbnail)
                .await
            {
                tracing::warn!("Thumbnail for {} not set: {}", uploaded.id, e);
            }
        }

        Ok(JobHandle::Immediate(PublishReceipt {
            permalink: Some(format!("https://www.youtube.com/shorts/{}", uploaded.id)),
            remote_id: uploaded.id,
            completion_kind: CompletionKind::Published,
        }))
    }

    async fn disconnect(&self, credential: &PlatformCredential) -> Result<()> {
        let response = self
            .client
            .post(&self.config.revoke_url)
            .form(&[("token", credential.access_token.as_str())])
            .send()
            .await?;
        http::check(Platform::YouTube, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::connected_credential;
    use crate::types::VariantKey;
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> YouTubeAdapter {
        let config = YouTubeConfig {
            client_id: "client.apps.googleusercontent.com".to_string(),
            api_base: server.url(),
            upload_base: format!("{}/upload", server.url()),
            revoke_url: format!("{}/revoke", server.url()),
            ..YouTubeConfig::default()
        };
        YouTubeAdapter::new(config, Client::new())
    }

    #[test]
    fn test_shorts_title() {
        let default = "My YouTube Short #Shorts";
        assert_eq!(shorts_title("", default), default);
        assert_eq!(shorts_title("   \nsecond line", default), default);
        assert_eq!(shorts_title("Sunset timelapse\nmore text", default), "Sunset timelapse #Shorts");
        assert_eq!(shorts_title("Already tagged #shorts", default), "Already tagged #shorts");

        let long = "x".repeat(300);
        let title = shorts_title(&long, default);
        assert_eq!(title.chars().count(), 100);
        assert!(title.ends_with(" #Shorts"));
    }

    #[test]
    fn test_authorization_request_requests_offline_access() {
        let adapter = YouTubeAdapter::new(
            YouTubeConfig {
                client_id: "cid".to_string(),
                ..YouTubeConfig::default()
            },
            Client::new(),
        );
        let request = adapter.authorization_request("s1").unwrap();
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(pairs.contains(&("state".to_string(), "s1".to_string())));
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "scope" && v.contains("youtube.upload")));
    }

    #[tokio::test]
    async fn test_account_summary() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("part".into(), "snippet,statistics".into()),
                Matcher::UrlEncoded("mine".into(), "true".into()),
            ]))
            .match_header("authorization", "Bearer ya29.token")
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"UC42","snippet":{"title":"Cuts","customUrl":"@cuts","thumbnails":{"default":{"url":"https://yt3.example/a.jpg"}}},"statistics":{"subscriberCount":"1200"}}]}"#,
            )
            .create_async()
            .await;

        let summary = adapter(&server).account_summary("ya29.token").await.unwrap();
        assert_eq!(summary.account_id, "UC42");
        assert_eq!(summary.display_name, "Cuts");
        assert_eq!(summary.username.as_deref(), Some("@cuts"));
        assert_eq!(summary.avatar_url.as_deref(), Some("https://yt3.example/a.jpg"));
        assert_eq!(summary.follower_count, Some(1200));
    }

    #[tokio::test]
    async fn test_revoked_token_is_auth_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":{"code":401,"message":"Request had invalid authentication credentials.","errors":[{"reason":"authError"}]}}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .validate(&connected_credential(Platform::YouTube))
            .await
            .unwrap_err();
        assert!(err.is_auth_rejection());
    }

    #[tokio::test]
    async fn test_resumable_upload_is_immediate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/media/short.mp4")
            .with_status(200)
            .with_body("videobytes")
            .create_async()
            .await;
        let session = server
            .mock("POST", "/upload/videos")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .match_header("x-upload-content-length", "10")
            .match_body(Matcher::PartialJson(json!({
                "snippet": {"title": "Hello #Shorts", "categoryId": "24"},
                "status": {"privacyStatus": "public"}
            })))
            .with_status(200)
            .with_header("location", &format!("{}/upload/session/1", server.url()))
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/upload/session/1")
            .match_body("videobytes")
            .with_status(200)
            .with_body(r#"{"id":"dQw4w9WgXcQ"}"#)
            .create_async()
            .await;

        let variant = TransformedVariant::pre_validated(
            VariantKey::default_for(Platform::YouTube),
            format!("{}/media/short.mp4", server.url()),
        );
        let handle = adapter(&server)
            .create_publish_job(
                &connected_credential(Platform::YouTube),
                &variant,
                "Hello",
                ContentType::Short,
            )
            .await
            .unwrap();

        session.assert_async().await;
        put.assert_async().await;
        match handle {
            JobHandle::Immediate(receipt) => {
                assert_eq!(receipt.remote_id, "dQw4w9WgXcQ");
                assert_eq!(
                    receipt.permalink.as_deref(),
                    Some("https://www.youtube.com/shorts/dQw4w9WgXcQ")
                );
                assert_eq!(receipt.completion_kind, CompletionKind::Published);
            }
            other => panic!("expected immediate receipt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quota_error_preserved() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/media/short.mp4")
            .with_status(200)
            .with_body("videobytes")
            .create_async()
            .await;
        server
            .mock("POST", "/upload/videos")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"quota exceeded","errors":[{"reason":"quotaExceeded"}]}}"#)
            .create_async()
            .await;

        let variant = TransformedVariant::pre_validated(
            VariantKey::default_for(Platform::YouTube),
            format!("{}/media/short.mp4", server.url()),
        );
        let err = adapter(&server)
            .create_publish_job(
                &connected_credential(Platform::YouTube),
                &variant,
                "",
                ContentType::Short,
            )
            .await
            .unwrap_err();
        match err {
            CastError::Remote(remote) => {
                assert_eq!(remote.code.as_deref(), Some("quotaExceeded"));
                assert_eq!(remote.status, Some(403));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_revokes_token() {
        let mut server = mockito::Server::new_async().await;
        let revoke = server
            .mock("POST", "/revoke")
            .match_body(Matcher::UrlEncoded("token".into(), "youtube-token".into()))
            .with_status(200)
            .create_async()
            .await;

        adapter(&server)
            .disconnect(&connected_credential(Platform::YouTube))
            .await
            .unwrap();
        revoke.assert_async().await;
    }
}
