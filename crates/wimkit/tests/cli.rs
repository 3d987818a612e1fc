//! Command-line behaviour that needs no native imaging subsystem.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn wimkit(root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("wimkit").unwrap();
    cmd.env_remove("WIMKIT_ROOT").arg("--root").arg(root);
    cmd
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("wimkit")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("mount")
                .and(predicate::str::contains("unmount"))
                .and(predicate::str::contains("export"))
                .and(predicate::str::contains("cleanup")),
        );
}

#[test]
fn list_with_no_mounts() {
    let temp = tempdir().unwrap();
    wimkit(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No tracked mounts"));
}

#[test]
fn list_json_is_empty_array() {
    let temp = tempdir().unwrap();
    wimkit(temp.path())
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn cleanup_removes_stale_empty_directories() {
    let temp = tempdir().unwrap();
    let stale = temp.path().join("mounts/8d3c51b2-6a7e-4f0d-b1c9-2e4a7f6d9c30/1");
    let kept = temp.path().join("mounts/0b9e2f4c-1d3a-4c8e-9f7b-6a5d4c3b2a10/1");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::create_dir_all(&kept).unwrap();
    std::fs::write(kept.join("pagefile.sys"), b"busy").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));

    wimkit(temp.path())
        .args(["cleanup", "--older-than-hours", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 removed, 1 still populated, 0 failed"));

    assert!(!stale.exists());
    assert!(kept.exists());
}

#[test]
fn info_reports_paths_under_root() {
    let temp = tempdir().unwrap();
    wimkit(temp.path())
        .args(["info", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stale_mount_hours").and(predicate::str::contains("dism.log")));
}

#[test]
fn export_rejects_unknown_compression() {
    let temp = tempdir().unwrap();
    wimkit(temp.path())
        .args(["export", "a.wim", "b.wim", "--compression", "zstd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown compression type: zstd"));
}

#[cfg(not(windows))]
#[test]
fn mount_is_unsupported_off_windows() {
    let temp = tempdir().unwrap();
    wimkit(temp.path())
        .args(["mount", "install.wim", "--read-only"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));
}
