//! HTTP plumbing shared by the platform adapters, broker and transcoding client

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::{RemoteError, Result};
use crate::types::Platform;

const USER_AGENT: &str = concat!("cast/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used for every remote call
///
/// Only the connect phase is bounded; uploads and long polls may take as long
/// as the remote side needs.
pub fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

/// Pass successful responses through, turn everything else into a [`RemoteError`]
pub async fn check(platform: Platform, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(remote_error(platform, status.as_u16(), &body).into())
}

/// Check the status and decode the JSON body
pub async fn json<T: DeserializeOwned>(platform: Platform, response: Response) -> Result<T> {
    let response = check(platform, response).await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        RemoteError::new(platform, format!("Unexpected response format: {}", e))
            .with_status(status)
            .with_body(body)
            .into()
    })
}

/// Extract message and code from the error bodies the platforms send
///
/// Understood shapes:
/// - Graph API: `{"error": {"message", "type", "code", "error_subcode"}}`
/// - Google: `{"error": {"code", "message", "errors": [{"reason"}]}}`
/// - TikTok: `{"error": {"code": "...", "message", "log_id"}}`
/// - plain `{"error": "..."}`, `{"detail": "..."}` or `{"message": "..."}`
pub fn remote_error(platform: Platform, status: u16, body: &str) -> RemoteError {
    let mut error = RemoteError::new(platform, default_message(status))
        .with_status(status)
        .with_body(body);

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return error;
    };

    match value.get("error") {
        Some(Value::Object(detail)) => {
            if let Some(message) = detail.get("message").and_then(Value::as_str) {
                error.message = message.to_string();
            }
            let reason = detail
                .get("errors")
                .and_then(|errors| errors.get(0))
                .and_then(|first| first.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string);
            error.code = reason.or_else(|| detail.get("code").and_then(code_string));
        }
        Some(Value::String(message)) => error.message = message.clone(),
        _ => {
            if let Some(message) = value
                .get("detail")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
            {
                error.message = message.to_string();
            }
        }
    }
    error
}

fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn default_message(status: u16) -> String {
    match status {
        400 => "Bad request".to_string(),
        401 => "Access token rejected".to_string(),
        403 => "Permission denied".to_string(),
        404 => "Not found".to_string(),
        429 => "Rate limit exceeded".to_string(),
        500..=599 => "Platform server error".to_string(),
        other => format!("Unexpected HTTP status {}", other),
    }
}
