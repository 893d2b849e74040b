//! Cloudinary as the transcoding service
//!
//! Uploads are unsigned (an upload preset configured on the cloud) and
//! renditions are requested through URL transformations.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::{MediaMeta, ProbeOutcome, TranscodingService, TransformProfile, UploadedSource};
use crate::config::TransformConfig;
use crate::error::{CastError, Result, TransformError};

pub struct CloudinaryClient {
    config: TransformConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    bytes: Option<u64>,
}

/// Content-addressed public id so re-uploading the same file reuses renditions
pub fn public_id_for(bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    format!("cast_{}", &digest[..16])
}

impl CloudinaryClient {
    pub fn new(config: TransformConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn upload_endpoint(&self) -> String {
        format!(
            "{}/{}/video/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    async fn ranged_get(&self, url: &str) -> Result<ProbeOutcome> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::RANGE, "bytes=0-1")
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::PARTIAL_CONTENT {
            Ok(ProbeOutcome::Ready)
        } else {
            Ok(ProbeOutcome::NotReady(status.as_u16()))
        }
    }
}

#[async_trait]
impl TranscodingService for CloudinaryClient {
    async fn upload(&self, source: &Path) -> Result<UploadedSource> {
        if self.config.cloud_name.is_empty() || self.config.upload_preset.is_empty() {
            return Err(TransformError::UploadFailed(
                "transform.cloud_name and transform.upload_preset must be configured".to_string(),
            )
            .into());
        }

        let bytes = tokio::fs::read(source).await.map_err(|e| {
            CastError::InvalidInput(format!("Cannot read {}: {}", source.display(), e))
        })?;
        let public_id = public_id_for(&bytes);
        let size_bytes = bytes.len() as u64;
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source.mp4".to_string());

        let form = Form::new()
            .text("upload_preset", self.config.upload_preset.clone())
            .text("public_id", public_id.clone())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.upload_endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransformError::UploadFailed(e.to_string()))?;

        // the service answers with its own error envelope; no platform applies
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransformError::UploadFailed(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(TransformError::UploadFailed(message).into());
        }

        let uploaded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| TransformError::UploadFailed(format!("Unexpected response: {}", e)))?;

        Ok(UploadedSource {
            public_id: uploaded.public_id,
            meta: MediaMeta {
                duration_secs: uploaded.duration,
                width: uploaded.width,
                height: uploaded.height,
                size_bytes: uploaded.bytes.unwrap_or(size_bytes),
            },
        })
    }

    fn delivery_url(&self, public_id: &str, profile: &TransformProfile) -> String {
        format!(
            "{}/{}/video/upload/{}/{}.{}",
            self.config.delivery_base.trim_end_matches('/'),
            self.config.cloud_name,
            profile.transformation(),
            public_id,
            profile.format
        )
    }

    /// HEAD first; a 400 or 423 may just mean the rendition is still being
    /// generated, so confirm with a two-byte ranged GET.
    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        let response = self.client.head(url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(ProbeOutcome::Ready);
        }
        match status.as_u16() {
            400 | 423 => self.ranged_get(url).await,
            other => Ok(ProbeOutcome::NotReady(other)),
        }
    }
}
