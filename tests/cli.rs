use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

const NOTES: &str = "# Week 1\n  - intro\n    - goals\n  - [ ] reading\n---\n## Lab\n  osmosis: diffusion of water\n";

#[test]
#[allow(deprecated)]
fn test_import_reports_created_blocks() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), NOTES).unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.arg("import").arg("notes.txt").current_dir(dir.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Imported 7 blocks"));
}

#[test]
#[allow(deprecated)]
fn test_import_json_output() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), NOTES).unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.arg("import")
        .arg("notes.txt")
        .arg("--json")
        .current_dir(dir.path());

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json.get("created").unwrap(), 7);
    let tree = json.get("tree").unwrap().as_array().unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree[0].get("content").unwrap(), "Week 1");
    assert_eq!(tree[0].get("variant").unwrap(), "heading1");
    assert_eq!(tree[1].get("type").unwrap(), "page-break");
}

#[test]
#[allow(deprecated)]
fn test_store_persists_between_runs() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), NOTES).unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["--store", "doc", "import", "notes.txt"])
        .current_dir(dir.path());
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["--store", "doc", "export"]).current_dir(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("# Week 1\n  - intro\n    - goals\n"))
        .stdout(predicate::str::contains("  [ ] reading\n"));
}

#[test]
#[allow(deprecated)]
fn test_paginate_splits_at_breaks() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), NOTES).unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["paginate", "notes.txt", "--json"])
        .current_dir(dir.path());

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json.get("degraded").unwrap(), false);
    let pages = json.get("pages").unwrap().as_array().unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(
        pages[1]["blocks"][0]["line"],
        serde_json::Value::from("## Lab")
    );
}

#[test]
#[allow(deprecated)]
fn test_paginate_small_pages() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), "one\ntwo\nthree\n").unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["paginate", "notes.txt", "--page-height", "50"])
        .current_dir(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::diff(
            "Page 1 (48px)\n  one\n  two\nPage 2 (24px)\n  three\n",
        ));
}

#[test]
#[allow(deprecated)]
fn test_suggest_reports_tidy_and_detections() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("notes.txt"),
        "this  is a messy line .\nosmosis: diffusion of water across a membrane\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["suggest", "notes.txt"]).current_dir(dir.path());

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let events: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let events = events.as_array().unwrap();
    let ready = events
        .iter()
        .find(|event| {
            event["event"] == "suggestion-ready"
                && event["suggestion"]["original"] == "this  is a messy line ."
        })
        .unwrap();
    assert_eq!(ready["suggestion"]["proposed"], "This is a messy line.");
    let detected = events
        .iter()
        .find(|event| event["event"] == "detections-ready")
        .unwrap();
    assert_eq!(detected["detections"][0]["front"], "this");
}

#[test]
#[allow(deprecated)]
fn test_missing_file_fails() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["import", "absent.txt"]).current_dir(dir.path());
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("absent.txt"));
}

#[test]
#[allow(deprecated)]
fn test_bad_config_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.json"), r#"{"layout": {"page_height": -1}}"#).unwrap();

    let mut cmd = Command::cargo_bin("md-blocks").unwrap();
    cmd.args(["--config", "config.json", "export"])
        .current_dir(dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("page_height must be positive"));
}
