//! CLI integration tests.
//!
//! These run the `beacond` binary in `--check` mode, which loads the
//! configuration and hosts file and exits without touching the network.

use std::io::Write;
use std::process::Command;

fn beacond() -> Command {
    Command::new(env!("CARGO_BIN_EXE_beacond"))
}

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("Failed to create file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write file");
    path
}

#[test]
fn test_help_command() {
    let output = beacond()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Multicast DNS responder daemon"));
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--check"));
}

#[test]
fn test_version_flag() {
    let output = beacond()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("beacond"));
}

#[test]
fn test_check_lists_static_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = write_file(
        &dir,
        "hosts",
        "# lab machines\n192.168.1.20 nas.local\n192.168.1.21 printer.local # shared\n",
    );
    let config = write_file(
        &dir,
        "config.json",
        r#"{"host_name": "beacon-test", "addresses": ["192.168.1.9"]}"#,
    );

    let output = beacond()
        .arg("--config")
        .arg(&config)
        .arg("--hosts")
        .arg(&hosts)
        .arg("--check")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("static hosts: 2"));
    assert!(stdout.contains("nas.local 192.168.1.20"));
    assert!(stdout.contains("host name: beacon-test.local (1 addresses)"));
    assert!(stdout.contains("configuration ok"));
}

#[test]
fn test_check_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(&dir, "config.json", r#"{"sweep_interval_secs": 0}"#);

    let output = beacond()
        .arg("--config")
        .arg(&config)
        .arg("--check")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
}

#[test]
fn test_check_with_missing_hosts_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(&dir, "config.json", "{}");

    let output = beacond()
        .arg("--config")
        .arg(&config)
        .arg("--hosts")
        .arg(dir.path().join("absent"))
        .arg("--check")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("static hosts: 0"));
    assert!(stdout.contains("not published"));
}
