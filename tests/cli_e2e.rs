//! End-to-end CLI tests for the blobfetch binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Command isolated from the user's config file.
fn blobfetch(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("blobfetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write_blobfetch_config(config_home: &TempDir, contents: &str) {
    let config_dir = config_home.path().join("blobfetch");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), contents).unwrap();
}

async fn mount_blob(server: &MockServer, cid: &str, status: u16, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/blob/{cid}")))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_bytes(body)
                .insert_header("Content-Type", "application/octet-stream"),
        )
        .mount(server)
        .await;
}

// ==================== Surface Tests ====================

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    blobfetch(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetch a batch"))
        .stdout(predicate::str::contains("--url-template"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    blobfetch(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("blobfetch"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    blobfetch(&home)
        .arg("--invalid-flag-that-does-not-exist")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_out_of_range_concurrency() {
    let home = TempDir::new().unwrap();
    blobfetch(&home)
        .args(["-c", "0", "bafyA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_binary_no_input_exits_cleanly() {
    let home = TempDir::new().unwrap();
    blobfetch(&home).write_stdin("").assert().success();
}

#[test]
fn test_binary_without_template_fails() {
    let home = TempDir::new().unwrap();
    blobfetch(&home)
        .arg("bafyA")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No URL template"));
}

#[test]
fn test_binary_rejects_invalid_config_file() {
    let home = TempDir::new().unwrap();
    write_blobfetch_config(&home, "concurrency = 0\n");
    blobfetch(&home)
        .arg("bafyA")
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

// ==================== Fetch Run Tests ====================

#[tokio::test]
async fn test_binary_writes_payloads_and_json_summary() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_blob(&server, "bafyA", 200, b"alpha").await;
    mount_blob(&server, "bafyB", 200, b"beta").await;

    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let assert = blobfetch(&home)
        .arg("--json")
        .arg("-u")
        .arg(format!("{}/blob/{{cid}}", server.uri()))
        .arg("-o")
        .arg(out.path())
        .args(["bafyA", "bafyB"])
        .assert()
        .success();

    let summary: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["succeeded"], 2);
    assert_eq!(summary["failed"], 0);
    assert_eq!(std::fs::read(out.path().join("bafyA")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(out.path().join("bafyB")).unwrap(), b"beta");
}

#[tokio::test]
async fn test_binary_reads_ids_from_stdin_and_config_template() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_blob(&server, "bafyA", 200, b"alpha").await;

    let home = TempDir::new().unwrap();
    write_blobfetch_config(
        &home,
        &format!("url_template = \"{}/blob/{{cid}}\"\nconcurrency = 2\n", server.uri()),
    );
    blobfetch(&home)
        .write_stdin("# ids\nbafyA\n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 fetched, 0 failed"));
}

#[tokio::test]
async fn test_binary_partial_success_exit_code() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_blob(&server, "ok", 200, b"data").await;
    mount_blob(&server, "missing", 404, b"").await;

    let home = TempDir::new().unwrap();
    let assert = blobfetch(&home)
        .arg("-u")
        .arg(format!("{}/blob/{{cid}}", server.uri()))
        .args(["ok", "missing"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed missing after 1 attempt(s)"));
    assert_eq!(
        assert.get_output().status.code(),
        Some(2),
        "partial success must yield exit code 2"
    );
}

#[tokio::test]
async fn test_binary_all_failed_exit_code() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_blob(&server, "missing", 404, b"").await;

    let home = TempDir::new().unwrap();
    let assert = blobfetch(&home)
        .arg("-q")
        .arg("-u")
        .arg(format!("{}/blob/{{cid}}", server.uri()))
        .arg("missing")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
    assert_eq!(assert.get_output().status.code(), Some(1));
}
