use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_catalogs_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("catalogs.toml");
    std::fs::write(
        &path,
        r#"
[[catalog]]
name = "tekton"
org = "tektoncd"
url = "https://github.com/tektoncd/catalog"
"#,
    )
    .unwrap();
    path
}

#[test]
fn test_init_registers_catalogs() {
    let temp = TempDir::new().unwrap();
    let catalogs = write_catalogs_file(temp.path());

    Command::cargo_bin("hubsync")
        .unwrap()
        .args(["init", "--data-dir"])
        .arg(temp.path().join("data"))
        .arg("--catalogs")
        .arg(&catalogs)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 new catalogs"));

    assert!(temp.path().join("data/hubsync.db").exists());

    // Re-running updates the existing row instead of duplicating it.
    Command::cargo_bin("hubsync")
        .unwrap()
        .args(["init", "--data-dir"])
        .arg(temp.path().join("data"))
        .arg("--catalogs")
        .arg(&catalogs)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 new catalogs"));
}

#[test]
fn test_sync_requires_init() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("hubsync")
        .unwrap()
        .args(["sync", "--data-dir"])
        .arg(temp.path().join("data"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("hubsync init"));
}
