//! Integration tests for cast-creds CLI
//!
//! Every test runs against its own config and credential file. Remote
//! endpoints point at a closed local port so nothing leaves the machine.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const UNREACHABLE: &str = "http://127.0.0.1:9";

/// Helper to create a test environment with an isolated config and store
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
    store_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let store_path = temp_dir.path().join("credentials.json");

        let config_content = format!(
            r#"
[store]
path = "{store}"

[broker]
base_url = "{remote}"

[instagram]
graph_base = "{remote}"

[youtube]
api_base = "{remote}"
revoke_url = "{remote}/revoke"

[tiktok]
api_base = "{remote}"
"#,
            store = store_path.to_string_lossy().replace('\\', "\\\\"),
            remote = UNREACHABLE,
        );
        fs::write(&config_path, config_content).unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
            store_path,
        }
    }

    /// Seed the credential file the way the store writes it
    fn seed(&self, entries: Value) {
        fs::write(&self.store_path, serde_json::to_string_pretty(&entries).unwrap()).unwrap();
    }

    fn stored(&self) -> serde_json::Map<String, Value> {
        let content = fs::read_to_string(&self.store_path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("cast-creds").unwrap();
        cmd.env("CAST_CONFIG", &self.config_path);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

fn connected_youtube() -> Value {
    json!({
        "youtube_access_token": "ya29.token",
        "youtube_refresh_token": "1//refresh",
        "youtube_user_id": "UC123",
        "youtube_display_name": "Cuts Channel",
        "youtube_channel_title": "Cuts Channel",
        "youtube_scopes": "https://www.googleapis.com/auth/youtube.upload",
        "youtube_status": "connected",
        "instagram_access_token": "EAAlong",
        "instagram_user_id": "17841400000",
        "instagram_display_name": "studio",
        "instagram_status": "connected"
    })
}

#[test]
fn test_status_with_nothing_stored() {
    let env = TestEnv::new();

    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("instagram: disconnected"))
        .stdout(predicate::str::contains("youtube: disconnected"))
        .stdout(predicate::str::contains("tiktok: disconnected"));
}

#[test]
fn test_status_shows_connected_account() {
    let env = TestEnv::new();
    env.seed(connected_youtube());

    env.cmd()
        .args(["status", "--platform", "youtube"])
        .assert()
        .success()
        .stdout(predicate::str::contains("youtube: connected as Cuts Channel"))
        .stdout(predicate::str::contains("instagram").not());
}

#[test]
fn test_status_json() {
    let env = TestEnv::new();
    env.seed(connected_youtube());

    let output = env
        .cmd()
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: Vec<Value> = serde_json::from_slice(&output).unwrap();

    assert_eq!(entries.len(), 3);
    let youtube = entries
        .iter()
        .find(|e| e["platform"] == "youtube")
        .unwrap();
    assert_eq!(youtube["status"], "connected");
    assert_eq!(youtube["account_id"], "UC123");
    let tiktok = entries.iter().find(|e| e["platform"] == "tiktok").unwrap();
    assert_eq!(tiktok["status"], "disconnected");
    assert!(tiktok["account_id"].is_null());
}

#[test]
fn test_unknown_platform_is_invalid_input() {
    let env = TestEnv::new();

    env.cmd()
        .args(["disconnect", "myspace"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("myspace"));
}

#[test]
fn test_disconnect_clears_every_key_when_revoke_unreachable() {
    let env = TestEnv::new();
    env.seed(connected_youtube());

    env.cmd()
        .args(["disconnect", "youtube"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disconnected youtube"));

    let stored = env.stored();
    assert!(stored.keys().all(|k| !k.starts_with("youtube_")));
    assert_eq!(stored["instagram_access_token"], "EAAlong");
}

#[test]
fn test_validate_never_connected() {
    let env = TestEnv::new();

    env.cmd()
        .args(["validate", "tiktok"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tiktok: disconnected"));
}

#[test]
fn test_validate_expired_token_without_network() {
    let env = TestEnv::new();
    let mut entries = connected_youtube();
    entries["youtube_expires_at"] = json!("2020-01-01T00:00:00+00:00");
    env.seed(entries);

    env.cmd()
        .args(["validate", "youtube"])
        .assert()
        .success()
        .stdout(predicate::str::contains("youtube: token is invalid"));

    let stored = env.stored();
    assert_eq!(stored["youtube_status"], "invalid");
    assert_eq!(stored["youtube_access_token"], "ya29.token");
}

#[test]
fn test_validate_network_failure_exits_nonzero() {
    let env = TestEnv::new();
    env.seed(connected_youtube());

    env.cmd()
        .args(["validate", "youtube"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_validate_requires_platform_or_all() {
    let env = TestEnv::new();

    env.cmd()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_refresh_without_stored_credential() {
    let env = TestEnv::new();

    env.cmd()
        .args(["refresh", "tiktok"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Credential not found"));
}
