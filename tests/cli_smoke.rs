use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn taskchain(db_path: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("taskchain")?;
    cmd.env("TASKCHAIN_DB", db_path)
        .env("TASKCHAIN_LOG", "off")
        .env_remove("TASKCHAIN_LOG_DIR")
        .env_remove("TASKCHAIN_FAKE_APPDATA");
    Ok(cmd)
}

fn run_json(db_path: &Path, args: &[&str]) -> Result<Value> {
    let output = taskchain(db_path)?.args(args).output()?;
    assert!(
        output.status.success(),
        "args: {args:?}\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn build_edit_and_check_a_chain() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("data").join("taskchain.sqlite3");

    let unit = run_json(&db_path, &["unit", "add", "Pump 7"])?;
    let unit_id = unit["id"].as_i64().expect("unit id").to_string();

    let mut task_ids = Vec::new();
    for (title, date) in [
        ("Inspect", "2024-01-01"),
        ("Repair", "2024-01-05"),
        ("Verify", "2024-01-09"),
    ] {
        let task = run_json(
            &db_path,
            &["task", "add", "--unit", &unit_id, "--title", title, "--date", date],
        )?;
        task_ids.push(task["id"].as_i64().expect("task id").to_string());
    }

    let linked = run_json(&db_path, &["chain", "link", &task_ids[0], &task_ids[2]])?;
    assert_eq!(linked["kind"], "linked");
    let inserted = run_json(&db_path, &["chain", "link", &task_ids[0], &task_ids[1]])?;
    assert_eq!(inserted["kind"], "inserted_between");

    let summary = run_json(&db_path, &["chain", "show", &task_ids[1], "--json"])?;
    assert_eq!(summary["chain_length"], 3);
    assert_eq!(summary["position"], 2);

    let deleted = run_json(&db_path, &["task", "delete", &task_ids[1]])?;
    assert!(deleted["bypass"].is_object());
    let restored = run_json(&db_path, &["task", "restore", &task_ids[1]])?;
    assert_eq!(restored["kind"], "reinserted");
    assert_eq!(restored["replaced_bypass"], true);

    let synced = run_json(
        &db_path,
        &["task", "complete", &task_ids[2], "--date", "2024-01-10"],
    )?;
    assert_eq!(synced["propagated_to"].as_array().map(Vec::len), Some(2));

    let output = taskchain(&db_path)?.args(["db", "status"]).output()?;
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Status       : ok"));
    assert!(stdout.contains("Offenders: none"));
    Ok(())
}

#[test]
fn unknown_task_exits_with_domain_code() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("taskchain.sqlite3");

    let output = taskchain(&db_path)?
        .args(["chain", "show", "999"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TASK/NOT_FOUND"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn db_status_json_is_parseable() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("taskchain.sqlite3");

    let report = run_json(&db_path, &["db", "status", "--json"])?;
    assert_eq!(report["status"], "ok");
    assert!(report["checks"].as_array().is_some_and(|checks| !checks.is_empty()));
    Ok(())
}
