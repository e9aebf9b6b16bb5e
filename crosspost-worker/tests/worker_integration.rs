//! Integration tests for the crosspost-worker binary

use assert_cmd::Command;
use libcrosspost::repository::Snapshot;
use libcrosspost::{Connection, Platform, Post};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temp dir with an empty config file
fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[worker]\nconcurrency = 2\n").unwrap();
    (dir, config)
}

fn worker(config: &Path, state: &Path) -> Command {
    let mut cmd = Command::cargo_bin("crosspost-worker").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--config")
        .arg(config)
        .arg("--state")
        .arg(state);
    cmd
}

fn write_state(path: &Path, posts: Vec<Post>, connections: Vec<Connection>) {
    let snapshot = Snapshot {
        posts,
        connections,
        publications: Vec::new(),
    };
    fs::write(path, serde_json::to_vec(&snapshot).unwrap()).unwrap();
}

fn read_state(path: &Path) -> Snapshot {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_help_lists_flags() {
    Command::cargo_bin("crosspost-worker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--concurrency"))
        .stdout(predicate::str::contains("--deadline"));
}

#[test]
fn test_invalid_config_exits_with_2() {
    let (dir, config) = setup();
    fs::write(&config, "[worker]\nconcurrency = 0\n").unwrap();

    worker(&config, &dir.path().join("state.json"))
        .write_stdin("")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("worker.concurrency"));
}

#[test]
fn test_unparseable_config_exits_with_2() {
    let (dir, config) = setup();
    fs::write(&config, "this is not toml [").unwrap();

    worker(&config, &dir.path().join("state.json"))
        .write_stdin("")
        .assert()
        .code(2);
}

#[test]
fn test_bad_deadline_is_a_usage_error() {
    let (dir, config) = setup();

    worker(&config, &dir.path().join("state.json"))
        .args(["--deadline", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--deadline"));
}

#[test]
fn test_empty_input_saves_state_and_exits_cleanly() {
    let (dir, config) = setup();
    let state = dir.path().join("state").join("state.json");

    worker(&config, &state)
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert_eq!(read_state(&state), Snapshot::default());
}

#[test]
fn test_jobs_are_reported_and_recorded() {
    let (dir, config) = setup();
    let state = dir.path().join("state.json");

    // A text-only YouTube post fails before any network call
    let post = Post::new("team-1", "no video here");
    write_state(
        &state,
        vec![post.clone()],
        vec![Connection::new("team-1", Platform::Youtube, "yt-token")],
    );

    let input = format!(
        "{}\n\nnot json\n{}\n",
        serde_json::json!({ "post_id": post.id, "platform": "youtube" }),
        serde_json::json!({ "post_id": "missing", "platform": "youtube" }),
    );

    let output = worker(&config, &state)
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let reports: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(reports.len(), 2);

    let failed = reports
        .iter()
        .find(|r| r["job"]["post_id"] == post.id.as_str())
        .unwrap();
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["result"]["error"]["kind"], "not_supported");

    let rejected = reports
        .iter()
        .find(|r| r["job"]["post_id"] == "missing")
        .unwrap();
    assert_eq!(rejected["status"], "rejected");

    let saved = read_state(&state);
    assert_eq!(saved.publications.len(), 1);
    assert_eq!(saved.publications[0].post_id, post.id);
    assert!(!saved.publications[0].result.success);
}
