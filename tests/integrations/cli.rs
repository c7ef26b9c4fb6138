use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn help_lists_overrides() {
    Command::cargo_bin("alertrelay")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--bridge-url"))
        .stdout(predicate::str::contains("--location"));
}

#[test]
fn invalid_config_exits_with_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[alert]\nrecipients = []\n").unwrap();

    Command::cargo_bin("alertrelay")
        .unwrap()
        .env_remove("RUST_LOG")
        .args(["--config", file.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("alert.recipients must contain at least one recipient"));
}
