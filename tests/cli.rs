//! Runs the `cvec` binary against a throwaway SQLite database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cvec_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cvec");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/cvec.sqlite"

[chunking]
max_tokens = 200
overlap_tokens = 40

[git]
cache_dir = "{}/clones"
allowed_schemes = ["https", "file"]

[server]
bind = "127.0.0.1:0"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("cvec.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cvec(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cvec_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cvec binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_cvec(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/cvec.sqlite").exists());
}

#[test]
fn test_repos_empty_user() {
    let (_tmp, config) = setup_test_env();
    run_cvec(&config, &["init"]);
    let (stdout, stderr, ok) = run_cvec(&config, &["repos", "alice"]);
    assert!(ok, "repos failed: {}", stderr);
    assert!(stdout.contains("No repositories for alice."));
}

#[test]
fn test_search_without_repositories() {
    let (_tmp, config) = setup_test_env();
    run_cvec(&config, &["init"]);
    let (stdout, stderr, ok) = run_cvec(&config, &["search", "parse config", "--username", "alice"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_unknown_repository_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_cvec(
        &config,
        &["search", "parse config", "--username", "alice", "--repo", "widgets"],
    );
    assert!(!ok);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn test_delete_unknown_repository_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_cvec(&config, &["delete", "alice", "widgets"]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn test_vectorize_rejects_bad_url() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_cvec(&config, &["vectorize", "not a url", "--username", "alice"]);
    assert!(!ok);
    assert!(stderr.contains("invalid request"), "{}", stderr);
}

#[test]
fn test_vectorize_unreachable_repository() {
    let (tmp, config) = setup_test_env();
    let missing = format!("file://{}/no-such-repo", tmp.path().display());
    let (stdout, stderr, ok) = run_cvec(
        &config,
        &["vectorize", &missing, "--username", "alice", "--progress", "off"],
    );
    assert!(!ok);
    assert!(stdout.contains("vectorize alice/no-such-repo"), "{}", stdout);
    assert!(stderr.contains("Job failed"), "{}", stderr);
    assert!(stderr.contains("repository unavailable"), "{}", stderr);
}

#[test]
fn test_vectorize_rejects_local_url_by_default() {
    let (tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config).unwrap();
    fs::write(&config, content.replace("allowed_schemes = [\"https\", \"file\"]\n", "")).unwrap();

    let local = format!("file://{}", tmp.path().display());
    let (_, stderr, ok) = run_cvec(&config, &["vectorize", &local, "--username", "alice"]);
    assert!(!ok);
    assert!(stderr.contains("unsupported repo_url scheme 'file'"), "{}", stderr);
}

#[test]
fn test_stats_unknown_repository_fails() {
    let (_tmp, config) = setup_test_env();
    run_cvec(&config, &["init"]);
    let (_, stderr, ok) = run_cvec(&config, &["stats", "alice", "widgets"]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn test_files_without_repositories() {
    let (_tmp, config) = setup_test_env();
    run_cvec(&config, &["init"]);
    let (stdout, stderr, ok) = run_cvec(&config, &["files", "main", "--username", "alice"]);
    assert!(ok, "files failed: {}", stderr);
    assert!(stdout.contains("No files matching 'main'."));
}

#[test]
fn test_missing_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_cvec(&tmp.path().join("absent.toml"), &["repos", "alice"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
