use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pagechat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pagechat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/pagechat.sqlite"

[chunking]
chunk_size = 256
overlap = 64

[retrieval]
top = 3
mode = "text"

[server]
bind = "127.0.0.1:7040"
"#,
        root.display()
    );

    let config_path = config_dir.join("pagechat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_dump(dir: &Path, name: &str, docs: &[(&str, &str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let lines: Vec<String> = docs
        .iter()
        .map(|(url, title, content)| {
            serde_json::json!({
                "url": url,
                "title": title,
                "content": content,
                "doc_type": "webpage",
                "scraped_at": "2024-05-01T12:00:00Z",
            })
            .to_string()
        })
        .collect();
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pagechat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pagechat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_database_and_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/pagechat.sqlite").exists());

    let (_, _, success) = run(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn ingest_inserts_then_skips_unchanged_documents() {
    let (tmp, config_path) = setup_test_env();
    let dump = write_dump(
        tmp.path(),
        "dump.jsonl",
        &[
            ("https://example.org/fees", "Fees", "Fees are due in October."),
            ("https://example.org/library", "Library", "The library opens at nine."),
        ],
    );

    run(&config_path, &["init"]);

    let (stdout, stderr, success) = run(&config_path, &["ingest", dump.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted: 2"), "got: {}", stdout);
    assert!(stdout.contains("ok"));

    // Same content again: nothing is written.
    let (stdout, _, success) = run(&config_path, &["ingest", dump.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("skipped: 2"), "got: {}", stdout);
    assert!(stdout.contains("inserted: 0"), "got: {}", stdout);
}

#[test]
fn search_finds_ingested_content() {
    let (tmp, config_path) = setup_test_env();
    let dump = write_dump(
        tmp.path(),
        "dump.jsonl",
        &[
            ("https://example.org/fees", "Fees", "Fees are due in October."),
            ("https://example.org/library", "Library", "The library opens at nine."),
        ],
    );

    run(&config_path, &["init"]);
    run(&config_path, &["ingest", dump.to_str().unwrap()]);

    let (stdout, _, success) = run(&config_path, &["search", "fees"]);
    assert!(success, "search failed");
    assert!(stdout.contains("Fees"), "expected the fees page, got: {}", stdout);
    assert!(stdout.starts_with("1."), "expected a ranked list, got: {}", stdout);
}

#[test]
fn changed_content_replaces_the_old_fragment_set() {
    let (tmp, config_path) = setup_test_env();
    let v1 = write_dump(
        tmp.path(),
        "v1.jsonl",
        &[("https://example.org/fees", "Fees", "Fees are due in October.")],
    );
    let v2 = write_dump(
        tmp.path(),
        "v2.jsonl",
        &[("https://example.org/fees", "Fees", "Fees are due in November.")],
    );

    run(&config_path, &["init"]);
    run(&config_path, &["ingest", v1.to_str().unwrap()]);

    let (stdout, _, _) = run(&config_path, &["ingest", v2.to_str().unwrap()]);
    assert!(stdout.contains("replaced: 1"), "got: {}", stdout);

    // No fragment of the October version survives.
    let (stdout, _, success) = run(&config_path, &["search", "October"]);
    assert!(success);
    assert!(stdout.contains("No results."), "got: {}", stdout);

    let (stdout, _, _) = run(&config_path, &["search", "November"]);
    assert!(stdout.contains("Fees"), "got: {}", stdout);
}

#[test]
fn search_with_empty_query_reports_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run(&config_path, &["init"]);
    let (stdout, _, success) = run(&config_path, &["search", ""]);
    assert!(success, "Empty query should not panic");
    assert!(stdout.contains("No results."));
}

#[test]
fn search_rejects_unknown_mode() {
    let (_tmp, config_path) = setup_test_env();

    run(&config_path, &["init"]);
    let (_, stderr, success) = run(&config_path, &["search", "fees", "--mode", "psychic"]);
    assert!(!success, "Unknown mode should fail");
    assert!(stderr.contains("unknown retrieval mode"), "got: {}", stderr);
}

#[test]
fn vector_modes_require_an_embedding_provider() {
    let (_tmp, config_path) = setup_test_env();

    run(&config_path, &["init"]);
    for mode in ["vector", "hybrid"] {
        let (_, stderr, success) = run(&config_path, &["search", "fees", "--mode", mode]);
        assert!(!success, "Mode {} should fail without embeddings", mode);
        assert!(stderr.contains("embeddings"), "got: {}", stderr);
    }
}

#[test]
fn type_filter_restricts_results() {
    let (tmp, config_path) = setup_test_env();
    let dump = write_dump(
        tmp.path(),
        "dump.jsonl",
        &[("https://example.org/fees", "Fees", "Fees are due in October.")],
    );

    run(&config_path, &["init"]);
    run(&config_path, &["ingest", dump.to_str().unwrap()]);

    // The only document is a webpage, so a pdf filter excludes it.
    let (stdout, _, success) = run(&config_path, &["search", "fees", "--type", "pdf"]);
    assert!(success);
    assert!(stdout.contains("No results."), "got: {}", stdout);

    let (stdout, _, _) = run(&config_path, &["search", "fees", "--type", "webpage"]);
    assert!(stdout.contains("Fees"), "got: {}", stdout);
}

#[test]
fn chat_requires_a_generation_provider() {
    let (_tmp, config_path) = setup_test_env();

    run(&config_path, &["init"]);
    let (_, stderr, success) = run(&config_path, &["chat", "When are fees due?"]);
    assert!(!success, "chat should fail without a generation provider");
    assert!(stderr.contains("generation provider"), "got: {}", stderr);
}

#[test]
fn ingest_rejects_malformed_dump_lines() {
    let (tmp, config_path) = setup_test_env();
    let path = tmp.path().join("broken.jsonl");
    fs::write(&path, "{\"url\": \"https://example.org\"").unwrap();

    run(&config_path, &["init"]);
    let (_, stderr, success) = run(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(!success, "malformed dump should fail");
    assert!(stderr.contains("line 1"), "got: {}", stderr);
}
