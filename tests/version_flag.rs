use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("drive-gallery")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("drive-gallery")
        .unwrap()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("Drive Gallery"))
        .stdout(predicate::str::contains("--list"))
        .stdout(predicate::str::contains("name_asc"));
}

#[test]
fn rejects_unknown_sort() {
    Command::cargo_bin("drive-gallery")
        .unwrap()
        .args(["--list", "--sort", "sideways"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown sort mode"));
}
