//! Redirect-style authorization completion
//!
//! A server-side OAuth exchange can finish by redirecting back with
//! `<platform>_connected=true&<platform>_user_id=...` or
//! `<platform>_error=...` in the query string. [`consume`] reads those
//! parameters and removes them from the URL, so the same callback cannot be
//! acted on twice.

use serde_json::{json, Value};
use url::Url;

use crate::types::Platform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Connected {
        platform: Platform,
        user_id: Option<String>,
    },
    Failed {
        platform: Platform,
        error: String,
    },
}

impl CallbackOutcome {
    pub fn platform(&self) -> Platform {
        match self {
            CallbackOutcome::Connected { platform, .. } | CallbackOutcome::Failed { platform, .. } => {
                *platform
            }
        }
    }

    /// Equivalent completion message for the auth channel
    pub fn to_message(&self) -> Value {
        match self {
            CallbackOutcome::Connected { platform, user_id } => json!({
                "type": format!("{}_AUTH_SUCCESS", platform.message_tag()),
                "authData": { "user_id": user_id },
            }),
            CallbackOutcome::Failed { platform, error } => json!({
                "type": format!("{}_AUTH_ERROR", platform.message_tag()),
                "error": error,
            }),
        }
    }
}

/// Read and strip the callback parameters of one platform
///
/// Returns `None` when the URL carries none of them. Unrelated query
/// parameters are preserved in their original order.
pub fn consume(url: &mut Url, platform: Platform) -> Option<CallbackOutcome> {
    let connected_key = platform.key("connected");
    let user_id_key = platform.key("user_id");
    let error_key = platform.key("error");

    let mut connected = None;
    let mut user_id = None;
    let mut error = None;
    let mut kept = Vec::new();

    for (key, value) in url.query_pairs() {
        if key == connected_key {
            connected = Some(value.into_owned());
        } else if key == user_id_key {
            user_id = Some(value.into_owned());
        } else if key == error_key {
            error = Some(value.into_owned());
        } else {
            kept.push((key.into_owned(), value.into_owned()));
        }
    }

    if connected.is_none() && user_id.is_none() && error.is_none() {
        return None;
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let outcome = match (error, connected.as_deref()) {
        (Some(error), _) => CallbackOutcome::Failed { platform, error },
        (None, Some("true")) => CallbackOutcome::Connected { platform, user_id },
        (None, _) => CallbackOutcome::Failed {
            platform,
            error: "callback did not confirm the connection".to_string(),
        },
    };
    tracing::debug!("Consumed {} callback parameters", platform);
    Some(outcome)
}

/// Consume callback parameters for every platform present in the URL
pub fn consume_all(url: &mut Url) -> Vec<CallbackOutcome> {
    Platform::ALL
        .iter()
        .filter_map(|platform| consume(url, *platform))
        .collect()
}

/// Translate a provider redirect into a completion message
///
/// Handles a plain OAuth redirect (`code`, `state`, `error`) as well as the
/// `<platform>_*` parameter family.
pub fn redirect_message(platform: Platform, url: &Url) -> Option<Value> {
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if let Some(error) = param("error") {
        let detail = param("error_description").unwrap_or(error);
        return Some(json!({
            "type": format!("{}_AUTH_ERROR", platform.message_tag()),
            "error": detail,
        }));
    }

    if let Some(code) = param("code") {
        return Some(json!({
            "type": format!("{}_AUTH_SUCCESS", platform.message_tag()),
            "authData": { "code": code, "state": param("state") },
        }));
    }

    let mut url = url.clone();
    consume(&mut url, platform).map(|outcome| outcome.to_message())
}
