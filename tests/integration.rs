use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docqa");
    path
}

/// Temp workspace with a config pointing at `<root>/docs` and an embedding
/// service that refuses connections.
fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("docs")).unwrap();

    let config_content = format!(
        r#"[docs]
dir = "{root}/docs"

[index]
path = "{root}/index_store/index"

[embedding]
provider = "ollama"
url = "http://127.0.0.1:9"
max_retries = 0
timeout_secs = 5

[generation]
url = "http://127.0.0.1:9"
{extra}
"#,
        root = root.display(),
        extra = extra,
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OLLAMA_HOST")
        .env_remove("DOCQA_DOCS_DIR")
        .env_remove("DOCQA_INDEX_PATH")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_help_lists_commands() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, _, success) = run_docqa(&config_path, &["--help"]);
    assert!(success);
    for command in ["build", "ask", "chat", "serve", "info"] {
        assert!(stdout.contains(command), "missing {} in help: {}", command, stdout);
    }
}

#[test]
fn test_build_empty_directory_reports_zero() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_docqa(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents loaded: 0"));
    assert!(stdout.contains("chunks created: 0"));
    assert!(stdout.contains("not written"));
    assert!(!tmp.path().join("index_store").join("index").exists());
}

#[test]
fn test_ask_without_index_is_an_error() {
    let (_tmp, config_path) = setup_test_env("");

    run_docqa(&config_path, &["build"]);
    let (stdout, stderr, success) = run_docqa(&config_path, &["ask", "What is the capital of France?"]);
    assert!(!success, "ask should fail without an index: stdout={}", stdout);
    assert!(stderr.contains("error:"));
    assert!(stderr.contains("index"));
}

#[test]
fn test_info_without_index_is_an_error() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_docqa(&config_path, &["info"]);
    assert!(!success);
    assert!(stderr.contains("docqa build"));
}

#[test]
fn test_build_reports_skipped_files() {
    let (tmp, config_path) = setup_test_env("");
    fs::write(tmp.path().join("docs").join("notes.docx"), b"not supported").unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("skipped: 1"));
    assert!(stdout.contains("unsupported file type 'docx'"));
}

#[test]
fn test_build_fails_when_embedding_service_is_down() {
    let (tmp, config_path) = setup_test_env("");
    fs::write(
        tmp.path().join("docs").join("capitals.txt"),
        "Paris is the capital of France.\n\nBerlin is the capital of Germany.",
    )
    .unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("embedding error"), "stderr: {}", stderr);
    assert!(!tmp.path().join("index_store").join("index").exists());
}

#[test]
fn test_invalid_chunking_config_rejected() {
    let (_tmp, config_path) = setup_test_env("\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
    let (_, stderr, success) = run_docqa(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
