use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_displays_usage() {
    Command::cargo_bin("tagpack")
        .expect("binary exists")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn print_config_shows_merged_options() {
    let temp = tempfile::tempdir().expect("temp dir");
    Command::cargo_bin("tagpack")
        .expect("binary exists")
        .current_dir(temp.path())
        .args(["--src", "site", "--print-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("src = \"site\""))
        .stdout(predicate::str::contains("bundle_directory = \"bundles\""));
}

#[test]
fn builds_a_site_and_writes_a_manifest() {
    let temp = tempfile::tempdir().expect("temp dir");
    let src = temp.path().join("src");
    fs::create_dir_all(&src).expect("src dir");
    fs::write(
        src.join("index.html"),
        "<body><script src=\"a.js\"></script></body>",
    )
    .expect("index");
    fs::write(src.join("a.js"), "var a = 1;").expect("script");

    Command::cargo_bin("tagpack")
        .expect("binary exists")
        .current_dir(temp.path())
        .args(["--quiet", "--manifest", "manifest.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 documents, 1 bundles"));

    let manifest = fs::read_to_string(temp.path().join("manifest.json")).expect("manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("json");
    assert_eq!(manifest["documents"][0], "index.html");
    assert_eq!(manifest["bundles"][0]["family"], "script");
    assert_eq!(manifest["bundles"][0]["sources"][0], "a.js");
    assert!(temp.path().join("dist/index.html").exists());
}

#[test]
fn missing_source_directory_fails() {
    let temp = tempfile::tempdir().expect("temp dir");
    Command::cargo_bin("tagpack")
        .expect("binary exists")
        .current_dir(temp.path())
        .args(["--src", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));
}
