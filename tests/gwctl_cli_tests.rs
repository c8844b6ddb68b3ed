//! Integration tests for the gwctl binary
//!
//! Only paths that fail validation or touch nothing outside a temp dir are
//! exercised here; nothing is remounted or restarted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a gwctl command reading its config from `dir`
fn gwctl(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gwctl").unwrap();
    cmd.arg("--config").arg(dir.join("gwctl.toml"));
    cmd
}

/// Runtime config that keeps every managed file inside `dir`
fn write_config(dir: &Path) {
    let config = format!(
        "[paths]\n\
         link_config = \"{0}/link.conf\"\n\
         unmanaged_config = \"{0}/unmanaged.conf\"\n\
         modem_profile = \"{0}/modem.conf\"\n\
         modem_device = \"{0}/cdc-wdm0\"\n",
        dir.display()
    );
    fs::write(dir.join("gwctl.toml"), config).unwrap();
}

#[test]
fn test_help_command() {
    Command::cargo_bin("gwctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Gateway Control"));
}

#[test]
fn test_missing_required_argument() {
    let dir = TempDir::new().unwrap();
    gwctl(dir.path())
        .args(["set-mtu", "--mtu", "1400"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--device"));
}

#[test]
fn test_empty_hostname_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    gwctl(dir.path())
        .args(["set-hostname", "--hostname", ""])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid argument"));
}

#[test]
fn test_out_of_range_mtu_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    gwctl(dir.path())
        .args(["set-mtu", "--mtu", "20", "--device", "eth0"])
        .assert()
        .code(2);
}

#[test]
fn test_bad_netmask_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    gwctl(dir.path())
        .args(["set-ipv4", "--address", "10.0.0.5", "--netmask", "255.0.255.0", "--device", "eth0"])
        .assert()
        .code(2);
}

#[test]
fn test_dhcp_server_requires_numeric_pool() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());
    gwctl(dir.path())
        .args(["dhcp-server", "--pool-offset", "ten", "--pool-size", "50"])
        .assert()
        .code(2);

    assert!(!dir.path().join("link.conf").exists());
}

#[test]
fn test_broken_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("gwctl.toml"), "[paths\nlink_config = ").unwrap();
    gwctl(dir.path())
        .arg("show")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("loading configuration"));
}

#[test]
fn test_apply_invalid_document_changes_nothing() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());
    let state = dir.path().join("state.toml");
    fs::write(
        &state,
        "hostname = \"gw-01\"\n[modem]\nconnection_name = \"lte\"\napn = \"\"\n",
    )
    .unwrap();

    gwctl(dir.path())
        .args(["apply", "--file"])
        .arg(&state)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("APN"));

    assert!(!dir.path().join("modem.conf").exists());
}

#[test]
fn test_apply_missing_document() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());
    gwctl(dir.path())
        .args(["apply", "--file"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("loading desired state"));
}

#[test]
fn test_show_json_on_fresh_system() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());
    gwctl(dir.path())
        .args(["--json", "show", "--device", "lo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dhcp_mode\": \"unconfigured\""))
        .stdout(predicate::str::contains("\"modem_device_present\": false"));
}
