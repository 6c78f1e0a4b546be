//! End-to-end tests running the compiled `docgen` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docgen_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docgen");
    path
}

fn setup_repo() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("docgen.toml");
    fs::write(
        &config_path,
        r#"
[prompt]
budget_ceiling = 30000

[generation]
api_key_env = "DOCGEN_TEST_API_KEY"

[storage]
backend = "memory"
"#,
    )
    .unwrap();

    let repo = root.join("repo");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join("src/main.go"), "package main\nfunc main() {}\n").unwrap();
    fs::write(repo.join("src/util.py"), "def util():\n    return 1\n").unwrap();
    fs::write(repo.join("NOTES.md"), "not source").unwrap();
    fs::write(repo.join(".git/config.sh"), "secret").unwrap();

    (tmp, config_path, repo)
}

fn run_docgen(config_path: &Path, args: &[&str], envs: &[(&str, &str)]) -> (String, String, bool) {
    let binary = docgen_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("DOCGEN_TEST_API_KEY")
        .env_remove("RUST_LOG");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docgen binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_ingest_prints_prompt() {
    let (_tmp, config, repo) = setup_repo();
    let (stdout, stderr, success) = run_docgen(&config, &["ingest", repo.to_str().unwrap()], &[]);

    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.starts_with("Generate comprehensive documentation"));
    assert!(stdout.contains("src/main.go\npackage main\nfunc main() {}\n\n"));
    assert!(stdout.contains("src/util.py\n"));
    assert!(!stdout.contains("not source"));
    assert!(!stdout.contains("secret"));

    assert!(stderr.contains("Processing File src/main.go"));
    assert!(stderr.contains("Processing File src/util.py"));
    assert!(!stderr.contains("NOTES.md"));
    assert!(stderr.contains("Included 2 of 2 files"));
}

#[test]
fn test_ingest_respects_ceiling_and_output() {
    let (tmp, config, repo) = setup_repo();
    let out = tmp.path().join("prompt.txt");

    // main.go is 5 words, util.py is 4 words: only the first fits under 6.
    let (stdout, stderr, success) = run_docgen(
        &config,
        &[
            "ingest",
            repo.to_str().unwrap(),
            "--ceiling",
            "6",
            "--output",
            out.to_str().unwrap(),
            "--quiet",
        ],
        &[],
    );

    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.is_empty());
    assert!(!stderr.contains("Processing File"));
    assert!(stderr.contains("Included 1 of 2 files"));

    let prompt = fs::read_to_string(&out).unwrap();
    assert!(prompt.contains("src/main.go"));
    assert!(!prompt.contains("src/util.py"));
}

#[test]
fn test_ingest_missing_directory_fails() {
    let (tmp, config, _repo) = setup_repo();
    let missing = tmp.path().join("nope");
    let (_stdout, stderr, success) = run_docgen(&config, &["ingest", missing.to_str().unwrap()], &[]);
    assert!(!success);
    assert!(stderr.contains("nope"));
}

#[test]
fn test_check_requires_credential() {
    let (_tmp, config, _repo) = setup_repo();

    let (stdout, stderr, success) = run_docgen(&config, &["check"], &[]);
    assert!(!success);
    assert!(stdout.contains("Configuration OK"));
    assert!(stderr.contains("DOCGEN_TEST_API_KEY"));

    let (stdout, stderr, success) =
        run_docgen(&config, &["check"], &[("DOCGEN_TEST_API_KEY", "test-key")]);
    assert!(success, "check failed: {}", stderr);
    assert!(stdout.contains("DOCGEN_TEST_API_KEY: set"));
    assert!(!stdout.contains("test-key"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _config, _repo) = setup_repo();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[prompt]\nbudget_ceiling = 0\n").unwrap();

    let (_stdout, stderr, success) = run_docgen(&bad, &["check"], &[]);
    assert!(!success);
    assert!(stderr.contains("budget_ceiling"));
}
