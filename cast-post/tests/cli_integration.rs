//! CLI integration tests for cast-post
//!
//! Platform APIs are served by mockito; the credential file is seeded the way
//! the store writes it.

use assert_cmd::Command;
use mockito::Matcher;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const VIDEO_URL: &str = "https://cdn.example.com/clips/final.mp4";

struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
    store_path: PathBuf,
}

impl TestEnv {
    /// Config with every remote surface pointed at `remote`
    fn new(remote: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let store_path = temp_dir.path().join("credentials.json");

        let config_content = format!(
            r#"
[store]
path = "{store}"

[broker]
base_url = "{remote}"

[publish]
poll_interval = "10ms"

[instagram]
graph_base = "{remote}"

[youtube]
api_base = "{remote}"
upload_base = "{remote}/upload"

[tiktok]
api_base = "{remote}"
"#,
            store = store_path.to_string_lossy().replace('\\', "\\\\"),
            remote = remote,
        );
        fs::write(&config_path, config_content).unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
            store_path,
        }
    }

    fn connect(&self, platform: &str, account_id: &str) {
        let mut entries: serde_json::Map<String, Value> = fs::read_to_string(&self.store_path)
            .ok()
            .map(|content| serde_json::from_str(&content).unwrap())
            .unwrap_or_default();
        entries.insert(format!("{}_access_token", platform), json!(format!("{}-token", platform)));
        entries.insert(format!("{}_user_id", platform), json!(account_id));
        entries.insert(format!("{}_display_name", platform), json!("tester"));
        entries.insert(format!("{}_status", platform), json!("connected"));
        fs::write(&self.store_path, serde_json::to_string(&entries).unwrap()).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("cast-post").unwrap();
        cmd.env("CAST_CONFIG", &self.config_path);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_nothing_connected_is_invalid_input() {
    let env = TestEnv::new("http://127.0.0.1:9");

    env.cmd()
        .args(["--url", VIDEO_URL])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No connected platforms"));
}

#[test]
fn test_requires_file_or_url() {
    let env = TestEnv::new("http://127.0.0.1:9");

    env.cmd().assert().failure();
}

#[test]
fn test_url_must_be_http() {
    let env = TestEnv::new("http://127.0.0.1:9");
    env.connect("tiktok", "open-1");

    env.cmd()
        .args(["--url", "file:///tmp/clip.mp4"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("http(s)"));
}

#[test]
fn test_file_upload_needs_transcoding_config() {
    let env = TestEnv::new("http://127.0.0.1:9");
    env.connect("tiktok", "open-1");
    let clip = env._temp_dir.path().join("clip.mp4");
    fs::write(&clip, b"video").unwrap();

    env.cmd()
        .arg(&clip)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("transform.cloud_name"));
}

#[test]
fn test_tiktok_inbox_reports_awaiting_user_action() {
    let mut server = mockito::Server::new();
    let init = server
        .mock("POST", "/v2/post/publish/inbox/video/init/")
        .match_header("authorization", "Bearer tiktok-token")
        .match_body(Matcher::PartialJson(json!({
            "source_info": {"source": "PULL_FROM_URL", "video_url": VIDEO_URL}
        })))
        .with_status(200)
        .with_body(r#"{"data":{"publish_id":"v_inbox_file~v2.1"},"error":{"code":"ok","message":""}}"#)
        .create();

    let env = TestEnv::new(&server.url());
    env.connect("tiktok", "open-1");

    let output = env
        .cmd()
        .args(["--url", VIDEO_URL, "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    init.assert();

    let report: Value = serde_json::from_slice(&output).unwrap();
    let outcomes = report["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["platform"], "tiktok");
    assert_eq!(outcomes[0]["job"]["state"], "COMPLETE");
    assert_eq!(outcomes[0]["job"]["completion_kind"], "awaiting_user_action");
    assert_eq!(outcomes[0]["job"]["remote_id"], "v_inbox_file~v2.1");
}

#[test]
fn test_instagram_container_flow() {
    let mut server = mockito::Server::new();
    let create = server
        .mock("POST", "/v21.0/17841400000/media")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("media_type".into(), "REELS".into()),
            Matcher::UrlEncoded("caption".into(), "launch day".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"id":"container-1"}"#)
        .create();
    server
        .mock("GET", "/v21.0/container-1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status_code":"FINISHED","id":"container-1"}"#)
        .create();
    let publish = server
        .mock("POST", "/v21.0/17841400000/media_publish")
        .match_body(Matcher::UrlEncoded("creation_id".into(), "container-1".into()))
        .with_status(200)
        .with_body(r#"{"id":"media-9"}"#)
        .expect(1)
        .create();
    server
        .mock("GET", "/v21.0/media-9")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"permalink":"https://www.instagram.com/reel/abc/","id":"media-9"}"#)
        .create();

    let env = TestEnv::new(&server.url());
    env.connect("instagram", "17841400000");

    env.cmd()
        .args(["--url", VIDEO_URL, "--caption", "launch day"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "✓ instagram (reel): published https://www.instagram.com/reel/abc/",
        ));
    create.assert();
    publish.assert();
}

#[test]
fn test_story_flag_and_create_failure() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v21.0/17841400000/media")
        .match_body(Matcher::UrlEncoded("media_type".into(), "STORIES".into()))
        .with_status(400)
        .with_body(r#"{"error":{"message":"Unsupported format","type":"OAuthException","code":36003,"fbtrace_id":"AbC"}}"#)
        .create();

    let env = TestEnv::new(&server.url());
    env.connect("instagram", "17841400000");

    env.cmd()
        .args(["--url", VIDEO_URL, "--story", "--platform", "instagram"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("✗ instagram (story): failed"));
}

#[test]
fn test_selected_platform_not_connected_is_skipped() {
    let env = TestEnv::new("http://127.0.0.1:9");

    env.cmd()
        .args(["--url", VIDEO_URL, "--platform", "youtube"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("✗ youtube (short): skipped"));
}
