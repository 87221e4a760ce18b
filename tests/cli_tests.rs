use std::fs;
use std::process::Command;

use anyhow::Result;
use funcache::{JsonCodec, SnapshotCodec};

fn funcache() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("funcache"));
    cmd.env_remove("FUNCACHE_DIR").env_remove("FUNCACHE_LOG");
    cmd
}

#[test]
fn exit_hook_persists_results_when_the_process_ends() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = funcache()
        .args(["bench", "--no-pool", "--repeat", "2", "--distinct", "3"])
        .arg("--root")
        .arg(dir.path())
        .arg("--flush-at-exit")
        .output()?;
    assert!(output.status.success(), "{output:?}");

    let path = dir.path().join("funcache.cli.square_slowly.json");
    let stored = JsonCodec.decode(&fs::read(&path)?)?;
    assert_eq!(stored.len(), 3);
    Ok(())
}

#[test]
fn inspect_reports_unreadable_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = funcache()
        .arg("inspect")
        .arg(dir.path().join("missing.json"))
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
    Ok(())
}
