/// End-to-end tests for the `mcplink` binary
///
/// These run the real CLI against temp config files, using the
/// `mcp_test_server` helper as a stdio server where a connection is needed.
use assert_cmd::Command;
use predicates::prelude::*;
mod common;

fn stdio_server_config() -> (tempfile::TempDir, std::path::PathBuf) {
    let exe = env!("CARGO_BIN_EXE_mcp_test_server");
    common::temp_config_file(&format!(
        "defaults:\n  auto_reconnect: false\n  connect_timeout_ms: 10000\nservers:\n  test:\n    command: \"{}\"\n",
        exe.replace('\\', "\\\\")
    ))
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_servers_lists_configured_names() {
    let (_dir, path) = common::temp_config_file(
        "servers:\n  files:\n    command: npx\n    args: [\"-y\", \"server-filesystem\"]\n  api:\n    url: http://localhost:3000/mcp\n    enabled: false\n",
    );

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("--config")
        .arg(path)
        .arg("servers");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("files"))
        .stdout(predicate::str::contains("npx -y server-filesystem"))
        .stdout(predicate::str::contains("api"));
}

#[test]
fn test_invalid_config_fails() {
    let (_dir, path) = common::temp_config_file("defaults:\n  request_timeout_ms: 0\n");

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.arg("--config").arg(path).arg("servers");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must be greater than 0"));
}

#[test]
fn test_unknown_server_fails() {
    let (_dir, path) = common::temp_config_file("servers: {}\n");

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.arg("--config").arg(path).arg("inspect").arg("ghost");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_call_tool_over_stdio() {
    let (_dir, path) = stdio_server_config();

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("--config")
        .arg(path)
        .arg("call")
        .arg("test")
        .arg("echo")
        .arg("--args")
        .arg(r#"{"message":"from the cli"}"#);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("from the cli"));
}

#[test]
fn test_inspect_over_stdio() {
    let (_dir, path) = stdio_server_config();

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("--config")
        .arg(path)
        .arg("inspect")
        .arg("test");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("mcp-test-server"))
        .stdout(predicate::str::contains("echo"));
}

#[test]
fn test_call_with_non_object_args_fails() {
    let (_dir, path) = stdio_server_config();

    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.arg("--config")
        .arg(path)
        .arg("call")
        .arg("test")
        .arg("echo")
        .arg("--args")
        .arg("[1, 2]");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}
