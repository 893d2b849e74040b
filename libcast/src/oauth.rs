//! Authorization completion channel
//!
//! An interactive authorization runs in a window the orchestrator does not
//! control. The window reports back through an [`AuthWindow`]: a message
//! channel plus a [`CancellationToken`] that fires when the window goes away.
//! Timeout and cancellation are therefore handled in one place, by the
//! lifecycle manager, instead of at every call site.
//!
//! Messages use the shape
//! `{"type": "<PLATFORM>_AUTH_SUCCESS", "authData": {...}}` or
//! `{"type": "<PLATFORM>_AUTH_ERROR", "error": "..."}`.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::callback;
use crate::types::Platform;

/// A decoded completion message
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMessage {
    Success { platform: Platform, auth_data: Value },
    Error { platform: Platform, error: String },
}

impl AuthMessage {
    /// Decode a raw message, `None` for anything that is not an auth message
    pub fn parse(data: &Value) -> Option<Self> {
        let kind = data.get("type")?.as_str()?;
        let platform = Platform::ALL
            .into_iter()
            .find(|p| kind.starts_with(p.message_tag()))?;
        let suffix = &kind[platform.message_tag().len()..];

        match suffix {
            "_AUTH_SUCCESS" => Some(AuthMessage::Success {
                platform,
                auth_data: data.get("authData").cloned().unwrap_or(Value::Null),
            }),
            "_AUTH_ERROR" => Some(AuthMessage::Error {
                platform,
                error: data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            _ => None,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            AuthMessage::Success { platform, .. } | AuthMessage::Error { platform, .. } => *platform,
        }
    }
}

/// A message posted by the authorization window, tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: Value,
}

/// Handle to an open authorization window
#[derive(Debug)]
pub struct AuthWindow {
    pub messages: mpsc::Receiver<WindowMessage>,
    /// Cancelled when the window is closed, by either side
    pub closed: CancellationToken,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("authorization window was blocked")]
    Blocked,

    #[error("failed to open authorization window: {0}")]
    Io(String),
}

/// Opens authorization windows
#[async_trait]
pub trait AuthLauncher: Send + Sync {
    async fn launch(&self, platform: Platform, url: &Url) -> Result<AuthWindow, LaunchError>;
}

/// Random value for the OAuth `state` parameter
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

struct OpenWindow {
    sender: mpsc::Sender<WindowMessage>,
    closed: CancellationToken,
}

#[derive(Default)]
struct ChannelState {
    blocked: bool,
    launches: Vec<(Platform, Url)>,
    open: HashMap<Platform, OpenWindow>,
}

/// In-process launcher driven by the embedding application
///
/// The application renders the authorization page however it likes and feeds
/// results back with [`ChannelLauncher::post`] and [`ChannelLauncher::close`].
#[derive(Clone, Default)]
pub struct ChannelLauncher {
    state: Arc<Mutex<ChannelState>>,
    launched: Arc<Notify>,
}

impl ChannelLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Make subsequent launches fail as if a popup blocker intervened
    pub fn set_blocked(&self, blocked: bool) {
        self.with_state(|state| state.blocked = blocked);
    }

    pub fn launch_count(&self) -> usize {
        self.with_state(|state| state.launches.len())
    }

    pub fn last_url(&self, platform: Platform) -> Option<Url> {
        self.with_state(|state| {
            state
                .launches
                .iter()
                .rev()
                .find(|(p, _)| *p == platform)
                .map(|(_, url)| url.clone())
        })
    }

    pub fn is_open(&self, platform: Platform) -> bool {
        self.with_state(|state| {
            state
                .open
                .get(&platform)
                .map(|window| !window.closed.is_cancelled())
                .unwrap_or(false)
        })
    }

    /// Wait until a window for `platform` is open
    pub async fn wait_for_launch(&self, platform: Platform) {
        loop {
            let notified = self.launched.notified();
            if self.is_open(platform) {
                return;
            }
            notified.await;
        }
    }

    /// Deliver a message from the window; false when no window is open
    pub async fn post(&self, platform: Platform, origin: &str, data: Value) -> bool {
        let sender = self.with_state(|state| {
            state
                .open
                .get(&platform)
                .filter(|window| !window.closed.is_cancelled())
                .map(|window| window.sender.clone())
        });
        match sender {
            Some(sender) => sender
                .send(WindowMessage {
                    origin: origin.to_string(),
                    data,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// The user closed the window
    pub fn close(&self, platform: Platform) {
        self.with_state(|state| {
            if let Some(window) = state.open.remove(&platform) {
                window.closed.cancel();
            }
        });
    }
}

#[async_trait]
impl AuthLauncher for ChannelLauncher {
    async fn launch(&self, platform: Platform, url: &Url) -> Result<AuthWindow, LaunchError> {
        let window = self.with_state(|state| {
            state.launches.push((platform, url.clone()));
            if state.blocked {
                return Err(LaunchError::Blocked);
            }
            let (sender, messages) = mpsc::channel(8);
            let closed = CancellationToken::new();
            state.open.insert(
                platform,
                OpenWindow {
                    sender,
                    closed: closed.clone(),
                },
            );
            Ok(AuthWindow { messages, closed })
        })?;
        self.launched.notify_waiters();
        Ok(window)
    }
}

/// Launcher for terminal use: the provider redirects to a local listener
///
/// The listener accepts requests on `127.0.0.1:<port>` until one carries an
/// authorization result, answers it with a short page and forwards the
/// result as a message from origin `http://127.0.0.1:<port>`.
pub struct LoopbackLauncher {
    port: u16,
    on_open: Arc<dyn Fn(Platform, &Url) + Send + Sync>,
}

impl LoopbackLauncher {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            on_open: Arc::new(|platform, url| {
                tracing::info!("Open this URL to authorize {}: {}", platform, url);
            }),
        }
    }

    /// Replace how the authorization URL is shown to the user
    pub fn with_opener(mut self, on_open: impl Fn(Platform, &Url) + Send + Sync + 'static) -> Self {
        self.on_open = Arc::new(on_open);
        self
    }

    pub fn origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

#[async_trait]
impl AuthLauncher for LoopbackLauncher {
    async fn launch(&self, platform: Platform, url: &Url) -> Result<AuthWindow, LaunchError> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| LaunchError::Io(format!("cannot listen on port {}: {}", self.port, e)))?;
        let (sender, messages) = mpsc::channel(1);
        let closed = CancellationToken::new();
        let origin = self.origin();

        let task_closed = closed.clone();
        tokio::spawn(async move {
            let listen_origin = origin.clone();
            tokio::select! {
                _ = task_closed.cancelled() => {}
                _ = sender.closed() => {}
                result = serve_redirect(listener, platform, &listen_origin) => match result {
                    Ok(data) => {
                        let _ = sender.send(WindowMessage { origin, data }).await;
                    }
                    Err(e) => {
                        tracing::warn!("Loopback listener failed: {}", e);
                        task_closed.cancel();
                    }
                },
            }
        });

        (self.on_open)(platform, url);
        Ok(AuthWindow { messages, closed })
    }
}

const REDIRECT_PAGE: &str = "<html><body><p>Authorization received. You can close this window.</p></body></html>";

async fn serve_redirect(
    listener: TcpListener,
    platform: Platform,
    origin: &str,
) -> std::io::Result<Value> {
    loop {
        let (mut stream, _) = listener.accept().await?;

        let mut buf = vec![0u8; 8192];
        let mut len = 0;
        while len < buf.len() {
            let n = stream.read(&mut buf[len..]).await?;
            if n == 0 {
                break;
            }
            len += n;
            if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        let head = String::from_utf8_lossy(&buf[..len]);
        let target = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/");
        let message = Url::parse(&format!("{}{}", origin, target))
            .ok()
            .and_then(|url| callback::redirect_message(platform, &url));

        let (status, body) = match message {
            Some(_) => ("200 OK", REDIRECT_PAGE),
            None => ("404 Not Found", ""),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        let _ = stream.shutdown().await;

        if let Some(message) = message {
            return Ok(message);
        }
    }
}
