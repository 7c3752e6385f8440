use assert_cmd::prelude::*;
use relatr_client::{
    event::{EventTemplate, Tag, KIND_TRUSTED_PROVIDERS},
    signer::KeySigner,
};
use std::{fs, process::Command};
use tempfile::TempDir;

const VARS: [&str; 6] = [
    "RELATR_SERVER_PUBKEY",
    "RELATR_RELAYS",
    "RELATR_PRIVATE_KEY",
    "RELATR_CALL_TIMEOUT_MS",
    "RELATR_QUERY_TIMEOUT_MS",
    "TOR_SOCKS",
];

fn relatr() -> Command {
    let mut cmd = Command::cargo_bin("relatr").unwrap();
    for v in VARS {
        cmd.env_remove(v);
    }
    cmd
}

fn write_env(dir: &TempDir, content: &str) -> String {
    let env_path = dir.path().join("env");
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

fn signed_event_json() -> serde_json::Value {
    let signer = KeySigner::from_bytes(&[1u8; 32]).unwrap();
    let ev = signer.sign_now(EventTemplate::new(
        KIND_TRUSTED_PROVIDERS,
        vec![Tag::new([
            "30382:rank",
            "60a6070044e5788bf8a9d4d4e5aaa98a3853eec38c3ecc483ced19800fb6b7b0",
            "wss://relay.contextvm.org",
        ])],
        "",
    ));
    serde_json::to_value(ev).unwrap()
}

#[test]
fn init_writes_default_env() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("nested/.env");

    relatr()
        .args(["--env", env_path.to_str().unwrap(), "init"])
        .assert()
        .success();

    let data = fs::read_to_string(&env_path).unwrap();
    for key in VARS {
        assert!(data.contains(&format!("{key}=")), "missing {key}");
    }
}

#[test]
fn verify_cli_success_and_failure() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "");

    let good = signed_event_json();
    let good_path = dir.path().join("good.json");
    fs::write(&good_path, serde_json::to_string(&good).unwrap()).unwrap();
    let output = relatr()
        .args(["--env", &env_path, "verify", good_path.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains(good["id"].as_str().unwrap()));

    let mut bad = signed_event_json();
    bad["id"] = serde_json::Value::String("ff".repeat(32));
    let bad_path = dir.path().join("bad.json");
    fs::write(&bad_path, serde_json::to_string(&bad).unwrap()).unwrap();
    relatr()
        .args(["--env", &env_path, "verify", bad_path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn invalid_server_key_in_env_fails() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "RELATR_SERVER_PUBKEY=not-a-key\n");
    relatr()
        .args(["--env", &env_path, "stats"])
        .assert()
        .failure();
}

#[test]
fn unreachable_relay_fails_health_check() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(
        &dir,
        "RELATR_RELAYS=ws://127.0.0.1:1\nRELATR_CALL_TIMEOUT_MS=2000\n",
    );
    relatr()
        .args(["--env", &env_path, "health"])
        .assert()
        .failure();
}

#[test]
fn publishing_without_key_fails() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "RELATR_RELAYS=ws://127.0.0.1:1\n");
    let output = relatr()
        .args(["--env", &env_path, "relay", "add", "wss://a"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("RELATR_PRIVATE_KEY"));
}

#[test]
fn cli_help_lists_commands() {
    let output = relatr()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    for cmd in [
        "init",
        "score",
        "scores",
        "search",
        "stats",
        "health",
        "subscription",
        "relays",
        "providers",
        "provider",
        "relay",
        "verify",
    ] {
        assert!(text.contains(cmd), "missing {cmd}");
    }
}

#[test]
fn cli_help_subcommand_still_works() {
    let output = relatr()
        .args(["help", "provider"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("set"));
    assert!(text.contains("remove"));
}
