//! Integration tests for the `only1mcp` CLI's read-only subcommands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config file");
    file
}

#[test]
fn validate_accepts_a_well_formed_config() {
    let file = write_config(
        r#"
server:
  host: "127.0.0.1"
  port: 8080
servers: []
"#,
    );

    Command::cargo_bin("only1mcp")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration valid"));
}

#[test]
fn validate_rejects_a_config_with_duplicate_server_ids() {
    let file = write_config(
        r#"
server:
  host: "127.0.0.1"
  port: 8080
servers:
  - id: "dup"
    name: "First"
    transport:
      type: stdio
      command: "echo"
  - id: "dup"
    name: "Second"
    transport:
      type: stdio
      command: "echo"
"#,
    );

    Command::cargo_bin("only1mcp")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .failure();
}

#[test]
fn list_prints_configured_servers() {
    let file = write_config(
        r#"
server:
  host: "127.0.0.1"
  port: 8080
servers:
  - id: "fs"
    name: "Filesystem"
    transport:
      type: stdio
      command: "echo"
"#,
    );

    Command::cargo_bin("only1mcp")
        .unwrap()
        .arg("--config")
        .arg(file.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("fs"))
        .stdout(predicate::str::contains("Filesystem"));
}
