use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn deckhand(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("deckhand").unwrap();
    cmd.env("DECKHAND_CONFIG", config);
    cmd
}

/// Fleet config with one target rooted in the temp dir. Preflight is
/// lenient so the suite runs unprivileged.
fn write_config(dir: &TempDir, root: &Path) -> std::path::PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "root".into());
    let config = dir.path().join("targets.yaml");
    std::fs::write(
        &config,
        format!(
            "preflight:\n  require_root: false\n  min_free_disk_mb: 0\n  min_free_mem_mb: 0\n  required_tools: []\ntargets:\n  fedimon:\n    root: {}\n    service_user: {user}\n",
            root.display()
        ),
    )
    .unwrap();
    config
}

fn scaffold_root(root: &Path) {
    std::fs::create_dir_all(root.join("deploy/systemd")).unwrap();
    std::fs::write(root.join(".env"), "X=1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(root.join(".env"), std::fs::Permissions::from_mode(0o600))
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Config and argument handling
// ---------------------------------------------------------------------------

#[test]
fn missing_config_fails_with_usage_code() {
    let dir = TempDir::new().unwrap();
    deckhand(&dir.path().join("nope.yaml"))
        .args(["fedimon", "--check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("config not found"));
}

#[test]
fn unknown_target_fails() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    deckhand(&config)
        .args(["dashboard", "--check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("target not found"));
}

#[test]
fn action_flags_are_mutually_exclusive() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    deckhand(&config)
        .args(["fedimon", "--check", "--rollback"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn shared_roots_are_rejected_before_any_action() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("targets.yaml");
    std::fs::write(
        &config,
        "targets:\n  one:\n    root: /srv/shared\n    service_user: a\n    services: [one.service]\n  two:\n    root: /srv/shared\n    service_user: b\n    services: [two.service]\n",
    )
    .unwrap();

    deckhand(&config)
        .args(["one", "--check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("share root"));
}

// ---------------------------------------------------------------------------
// --check
// ---------------------------------------------------------------------------

#[test]
fn check_passes_on_a_well_formed_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    deckhand(&config)
        .args(["fedimon", "--check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("preflight"))
        .stdout(predicate::str::contains("passed"))
        .stdout(predicate::str::contains("skipped"));
}

#[test]
fn check_reports_diagnostics_with_preflight_exit_code() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    // Root exists but has no unit dir and no secrets file.
    std::fs::create_dir_all(&root).unwrap();
    let config = write_config(&dir, &root);

    deckhand(&config)
        .args(["fedimon", "--check"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("preflight failed"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn check_json_output_is_machine_parseable() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    let output = deckhand(&config)
        .args(["fedimon", "--check", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(summary["target"], "fedimon");
    assert_eq!(summary["ok"], true);
    assert_eq!(summary["outcomes"][0]["phase"], "preflight");
    assert_eq!(summary["outcomes"][0]["status"], "passed");
}

// ---------------------------------------------------------------------------
// --status
// ---------------------------------------------------------------------------

#[test]
fn status_without_target_lists_the_fleet() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    deckhand(&config)
        .arg("--status")
        .assert()
        .success()
        .stdout(predicate::str::contains("fedimon"))
        .stdout(predicate::str::contains("last good revision: (none)"));
}

#[test]
fn status_json_includes_deploy_state() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    scaffold_root(&root);
    let config = write_config(&dir, &root);

    let output = deckhand(&config)
        .args(["fedimon", "--status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let statuses: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(statuses[0]["name"], "fedimon");
    assert!(statuses[0]["last_good_rev"].is_null());
    assert!(statuses[0]["units"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// --dry-run (requires git)
// ---------------------------------------------------------------------------

fn git_fixture(dir: &TempDir) -> Option<std::path::PathBuf> {
    if which_git().is_none() {
        return None;
    }
    let seed = dir.path().join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    let sh = |cwd: &Path, args: &[&str]| {
        let ok = std::process::Command::new(args[0])
            .args(&args[1..])
            .current_dir(cwd)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@t")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@t")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(ok, "{args:?}");
    };
    sh(&seed, &["git", "init", "-q", "-b", "main"]);
    std::fs::create_dir_all(seed.join("deploy/systemd")).unwrap();
    std::fs::write(seed.join("deploy/systemd/fedimon.service"), "[Unit]\n").unwrap();
    std::fs::write(seed.join("app.py"), "print('v1')\n").unwrap();
    sh(&seed, &["git", "add", "."]);
    sh(&seed, &["git", "commit", "-q", "-m", "init"]);
    sh(dir.path(), &["git", "clone", "-q", "--bare", "seed", "upstream.git"]);
    sh(dir.path(), &["git", "clone", "-q", "upstream.git", "clone"]);

    let root = dir.path().join("clone");
    std::fs::write(root.join(".env"), "X=1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(root.join(".env"), std::fs::Permissions::from_mode(0o600))
            .unwrap();
    }
    Some(root)
}

fn which_git() -> Option<std::path::PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|p| p.join("git"))
            .find(|p| p.is_file())
    })
}

#[test]
fn dry_run_reports_planned_actions_and_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let Some(root) = git_fixture(&dir) else {
        return;
    };
    let user = std::env::var("USER").unwrap_or_else(|_| "root".into());
    let config = dir.path().join("targets.yaml");
    std::fs::write(
        &config,
        format!(
            "preflight:\n  require_root: false\n  min_free_disk_mb: 0\n  min_free_mem_mb: 0\n  required_tools: []\ntargets:\n  fedimon:\n    root: {}\n    service_user: {user}\n    services: [fedimon.service]\n",
            root.display()
        ),
    )
    .unwrap();

    deckhand(&config)
        .args(["fedimon", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("planned"))
        .stdout(predicate::str::contains("Planned actions:"))
        .stdout(predicate::str::contains("systemctl restart fedimon.service"));

    // No lock, no state, no snapshot: a dry run leaves the target untouched.
    assert!(!root.join(".deckhand").exists());
}
