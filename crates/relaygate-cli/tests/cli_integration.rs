//! CLI integration tests for the `relaygate` binary.
//!
//! Each test spawns the compiled binary with `RELAYGATE_CONFIG` removed so
//! only the config passed on the command line is used.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

const CONFIG: &str = r#"
routing_strategy = "cost"
emergency_fallback = "fast"

[[backends]]
id = "big"
capabilities = ["text", "code", "reasoning", "long_context", "streaming"]
cost_per_token = 0.00003
declared_latency_ms = 2500
tier = "flagship"

[[backends]]
id = "fast"
capabilities = ["text", "streaming"]
cost_per_token = 0.000001
declared_latency_ms = 300
tier = "fast"
"#;

fn relaygate_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_relaygate"));
    cmd.env_remove("RELAYGATE_CONFIG");
    // Suppress tracing output so assertions only match program output.
    cmd.env("RUST_LOG", "off");
    cmd
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout}"))
}

// ── 1. Version and help ─────────────────────────────────────────────────

#[test]
fn help_output() {
    let output = relaygate_bin()
        .arg("--help")
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("route"), "got: {stdout}");
    assert!(stdout.contains("backends"), "got: {stdout}");
}

#[test]
fn version_output() {
    let output = relaygate_bin()
        .arg("--version")
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("relaygate"));
}

// ── 2. check ────────────────────────────────────────────────────────────

#[test]
fn check_prints_effective_config() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["check", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["routing_strategy"], "cost");
    assert_eq!(json["max_retries"], 3);
    assert_eq!(json["backends"].as_array().map(Vec::len), Some(2));
}

#[test]
fn check_rejects_invalid_config() {
    let config = write_config("circuit_breaker_threshold = 0\n");
    let output = relaygate_bin()
        .args(["check", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("circuit_breaker_threshold"), "got: {stderr}");
}

#[test]
fn check_reads_config_from_env() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .env("RELAYGATE_CONFIG", config.path())
        .arg("check")
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["routing_strategy"], "cost");
}

// ── 3. route ────────────────────────────────────────────────────────────

#[test]
fn route_picks_capable_backend() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["route", "--prompt", "refactor this function", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["selected_backend"], "big");
    assert_eq!(json["strategy"], "cost");
}

#[test]
fn route_cost_strategy_prefers_cheap_backend() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["route", "--prompt", "say hi", "--tier", "free", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["selected_backend"], "fast");
}

#[test]
fn route_rejects_custom_strategy() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["route", "--prompt", "hi", "--strategy", "custom", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("custom"));
}

#[test]
fn route_without_capable_backend_fails() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["route", "--prompt", "describe", "--image", "cat.png", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(!output.status.success());
}

// ── 4. backends ─────────────────────────────────────────────────────────

#[test]
fn backends_lists_table() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["backends", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("big"), "got: {stdout}");
    assert!(stdout.contains("flagship"), "got: {stdout}");
    assert!(stdout.contains("2 backend(s)"), "got: {stdout}");
}

#[test]
fn backends_without_config_reports_none() {
    let output = relaygate_bin()
        .arg("backends")
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No backends configured"));
}

// ── 5. health ───────────────────────────────────────────────────────────

#[test]
fn health_reports_declared_backends() {
    let config = write_config(CONFIG);
    let output = relaygate_bin()
        .args(["health", "--config"])
        .arg(config.path())
        .output()
        .expect("failed to run relaygate");

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["overall"], "healthy");
    assert_eq!(json["total_backends"], 2);
}
