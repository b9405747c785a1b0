use assert_cmd::assert::OutputAssertExt;
use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

const RESPONSE: &str = r#"Creating the page.
<stageArtifact id="site" title="Static site">
<stageAction type="file" filePath="/home/project/public/index.html"><h1>hello</h1></stageAction>
<stageAction type="file" filePath="notes.md">- one</stageAction>
</stageArtifact>
Done."#;

fn stagehand() -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin!("stagehand"));
    for key in [
        "STAGEHAND_WORKDIR",
        "STAGEHAND_PROJECT_ROOT",
        "STAGEHAND_INSTALL_COMMAND",
        "STAGEHAND_SETTLE_DELAY_MS",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn write_response(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("response.txt");
    fs::write(&path, RESPONSE).expect("write response");
    path
}

#[test]
fn help_lists_commands() {
    let output = stagehand().arg("--help").output().expect("run help");
    assert!(output.status.success(), "--help should succeed");
    let text = String::from_utf8_lossy(&output.stdout);
    for needle in ["parse", "replay", "--workdir", "--project-root"] {
        assert!(text.contains(needle), "help output should contain '{needle}'");
    }
}

#[test]
fn parse_prints_one_json_event_per_line() {
    let tmp = TempDir::new().expect("tmpdir");
    let response = write_response(&tmp);

    let assert = stagehand()
        .args(["parse", response.to_str().unwrap()])
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let events: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    let kinds: Vec<&str> = events
        .iter()
        .map(|event| event["event"].as_str().unwrap_or_default())
        .collect();

    assert_eq!(kinds.first(), Some(&"text"));
    assert_eq!(kinds.iter().filter(|kind| **kind == "action_close").count(), 2);
    assert_eq!(kinds.iter().filter(|kind| **kind == "artifact_close").count(), 1);
    assert!(!kinds.contains(&"action_stream"));
}

#[test]
fn chunked_parse_streams_partial_file_content() {
    let tmp = TempDir::new().expect("tmpdir");
    let response = write_response(&tmp);

    stagehand()
        .args(["parse", response.to_str().unwrap(), "--chunk-bytes", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"event\":\"action_stream\""))
        .stdout(predicate::str::contains("\"event\":\"action_close\""));
}

#[test]
fn parse_reports_missing_file() {
    stagehand()
        .args(["parse", "/definitely/not/here.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read response"));
}

#[test]
fn replay_writes_files_into_the_workdir() {
    let tmp = TempDir::new().expect("tmpdir");
    let response = write_response(&tmp);
    let workdir = tmp.path().join("sandbox");

    let assert = stagehand()
        .args([
            "--workdir",
            workdir.to_str().unwrap(),
            "replay",
            response.to_str().unwrap(),
            "--chunk-bytes",
            "16",
        ])
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&output).expect("json summary");

    assert_eq!(
        fs::read_to_string(workdir.join("public/index.html")).unwrap(),
        "<h1>hello</h1>\n"
    );
    assert!(workdir.join("notes.md").is_file());
    let files: Vec<&str> = summary["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|file| file.as_str())
        .collect();
    assert!(files.contains(&"public/index.html"));
    assert_eq!(summary["artifacts"][0]["id"], "site");
    assert_eq!(summary["artifacts"][0]["closed"], true);
    assert_eq!(summary["artifacts"][0]["actions"][0]["status"], "complete");
    assert_eq!(summary["setup"]["install_attempts"], 0);
}

#[test]
fn workdir_env_file_sets_project_root() {
    let tmp = TempDir::new().expect("tmpdir");
    let workdir = tmp.path().join("sandbox");
    fs::create_dir_all(&workdir).unwrap();
    fs::write(workdir.join(".env"), "STAGEHAND_PROJECT_ROOT=/srv/app\n").unwrap();
    let response = tmp.path().join("response.txt");
    fs::write(
        &response,
        r#"<stageArtifact id="a" title="a"><stageAction type="file" filePath="/srv/app/lib/x.txt">x</stageAction></stageArtifact>"#,
    )
    .unwrap();

    stagehand()
        .args([
            "--workdir",
            workdir.to_str().unwrap(),
            "replay",
            response.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(workdir.join("lib/x.txt")).unwrap(), "x\n");
}
