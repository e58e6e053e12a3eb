use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("media_listener").unwrap();
        cmd.env("MEDIA_LISTENER_CONFIG", self.dir.path().join("config.toml"))
            .env_remove("MEDIA_LISTENER_SOCKET")
            .env_remove("RUST_LOG")
            .arg("--socket")
            .arg(self.dir.path().join("media.sock"));
        cmd
    }
}

#[test]
fn config_path_follows_env() {
    let env = TestEnv::new();
    env.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("config.toml"));
}

#[test]
fn config_show_merges_file_and_flags() {
    let env = TestEnv::new();
    fs::write(
        env.dir.path().join("config.toml"),
        "[events]\ndedupe = false\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    env.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("dedupe = false"))
        .stdout(contains("level = \"debug\""))
        .stdout(contains("media.sock"));
}

#[test]
fn broken_config_is_reported() {
    let env = TestEnv::new();
    fs::write(env.dir.path().join("config.toml"), "[socket\n").unwrap();

    env.cmd()
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(contains("Failed to parse config file"));
}

#[test]
fn status_without_daemon() {
    let env = TestEnv::new();
    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Daemon is not running."));
}

#[test]
fn daemon_status_without_daemon() {
    let env = TestEnv::new();
    env.cmd()
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("Daemon is not running."));
}

#[test]
fn daemon_stop_without_daemon() {
    let env = TestEnv::new();
    env.cmd()
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("Daemon is not running."));
}

#[test]
fn watch_requires_daemon() {
    let env = TestEnv::new();
    env.cmd()
        .arg("watch")
        .assert()
        .failure()
        .stderr(contains("Daemon is not running"));
}

#[cfg(not(target_os = "macos"))]
#[test]
fn now_is_macos_only() {
    let env = TestEnv::new();
    env.cmd()
        .arg("now")
        .assert()
        .failure()
        .stderr(contains("only available on macOS"));
}

#[cfg(not(target_os = "macos"))]
#[test]
fn run_refuses_without_mediaremote() {
    let env = TestEnv::new();
    env.cmd()
        .arg("run")
        .assert()
        .failure()
        .stderr(contains("only available on macOS"));

    assert!(!env.dir.path().join("media.sock").exists());
}
