use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_policy-index"))
}

const MANIFESTO: &str = r#"{"chunk_id":"housing-1","title":"Housing","content":"We will build ten thousand affordable homes.","source_date":"2024-11-01","citation":{"who":"Party","when":"2024-11-01","context":"Manifesto"}}
{"chunk_id":"transport-1","title":"Transport","content":"Free public transport for students and pensioners."}
{"chunk_id":"tiny","title":"Tiny","content":"Short."}
"#;

const WEBSITE: &str = r#"[
  {"source_type":"website-page","chunk_id":"about","title":"About us","content":"The party was founded to make housing affordable.","source_url":"https://example.org/about"}
]"#;

/// Writes datasets and a config; `embedding` is spliced in verbatim.
fn setup_test_env(embedding: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("datasets");
    fs::create_dir_all(data_dir.join("web")).unwrap();
    fs::write(data_dir.join("manifesto.jsonl"), MANIFESTO).unwrap();
    fs::write(data_dir.join("web").join("pages.json"), WEBSITE).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/policy.sqlite"

{embedding}

[retrieval]
limit = 5
threshold = 0.5

[datasets.manifesto]
path = "{root}/datasets/manifesto.jsonl"
source_type = "manifesto"

[datasets.website]
path = "{root}/datasets/web"
"#,
        root = root.display(),
        embedding = embedding,
    );

    let config_path = root.join("policy-index.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run policy-index: {}", e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn stats_json(config_path: &Path) -> serde_json::Value {
    let (stdout, stderr, ok) = run(config_path, &["stats", "--json"]);
    assert!(ok, "stats failed: {}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn init_is_idempotent() {
    let (tmp, config) = setup_test_env("");
    for _ in 0..2 {
        let (stdout, stderr, ok) = run(&config, &["init"]);
        assert!(ok, "init failed: {}", stderr);
        assert!(stdout.contains("initialized"));
    }
    assert!(tmp.path().join("data/policy.sqlite").exists());
}

#[test]
fn index_without_embeddings_stores_documents() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run(&config, &["index", "all"]);
    assert!(ok, "index failed: {}", stderr);
    assert!(stdout.contains("embeddings skipped: 3"), "{}", stdout);
    assert!(stdout.contains("embeddings skipped: 1"), "{}", stdout);

    let stats = stats_json(&config);
    assert_eq!(
        stats,
        serde_json::json!([
            {"source_type": "manifesto", "total": 3, "with_embedding": 0},
            {"source_type": "website-page", "total": 1, "with_embedding": 0}
        ])
    );
}

#[test]
fn reindexing_is_idempotent() {
    let (_tmp, config) = setup_test_env("");
    assert!(run(&config, &["index", "manifesto"]).2);
    let (stdout, stderr, ok) = run(&config, &["index", "manifesto"]);
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("(0 new, 3 updated)"), "{}", stdout);
    assert_eq!(stats_json(&config)[0]["total"], 3);

    let (stdout, _, ok) = run(&config, &["get", "manifesto", "housing-1", "--json"]);
    assert!(ok);
    let doc: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(doc["version"], 2);
    assert_eq!(doc["citation"]["who"], "Party");
    assert_eq!(doc["source_date"], "2024-11-01");
}

#[test]
fn dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run(&config, &["index", "all", "--dry-run"]);
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("records found: 3"), "{}", stdout);
    assert!(!tmp.path().join("data/policy.sqlite").exists());
}

#[test]
fn index_file_with_default_source_type() {
    let (tmp, config) = setup_test_env("");
    let file = tmp.path().join("answers.jsonl");
    fs::write(
        &file,
        r#"{"chunk_id":"q1","title":"Q1","content":"Curated answer about taxes."}"#,
    )
    .unwrap();

    let (_, stderr, ok) = run(
        &config,
        &["index-file", file.to_str().unwrap(), "--source-type", "curated-answer"],
    );
    assert!(ok, "{}", stderr);
    let (stdout, _, ok) = run(&config, &["get", "curated-answer", "q1"]);
    assert!(ok);
    assert!(stdout.contains("embedding:    none"), "{}", stdout);
}

#[test]
fn missing_chunk_id_fails_the_run() {
    let (tmp, config) = setup_test_env("");
    let file = tmp.path().join("broken.jsonl");
    fs::write(&file, r#"{"title":"No id","content":"Content without id."}"#).unwrap();
    let (_, stderr, ok) = run(
        &config,
        &["index-file", file.to_str().unwrap(), "--source-type", "manifesto"],
    );
    assert!(!ok);
    assert!(stderr.contains("chunk_id"), "{}", stderr);
}

#[test]
fn lookup_finds_unembedded_documents() {
    let (_tmp, config) = setup_test_env("");
    assert!(run(&config, &["index", "all"]).2);
    let (stdout, _, ok) = run(&config, &["lookup", "AFFORDABLE"]);
    assert!(ok);
    assert!(stdout.contains("manifesto:housing-1"), "{}", stdout);
    assert!(stdout.contains("website-page:about"), "{}", stdout);
    assert!(stdout.contains("(no embedding)"));
}

#[test]
fn get_missing_document_fails() {
    let (_tmp, config) = setup_test_env("");
    assert!(run(&config, &["init"]).2);
    let (_, stderr, ok) = run(&config, &["get", "manifesto", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn search_requires_embeddings() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, ok) = run(&config, &["search", "housing"]);
    assert!(!ok);
    assert!(stderr.contains("requires embeddings"), "{}", stderr);
}

#[test]
fn search_rejects_out_of_range_threshold() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run(&config, &["search", "housing", "--threshold", "5"]);
    assert!(!ok);
    assert!(!stdout.contains("No results."), "{}", stdout);
    assert!(
        stderr.contains("retrieval.threshold must be in [-1.0, 1.0]"),
        "{}",
        stderr
    );
}

#[test]
fn unknown_dataset_fails() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, ok) = run(&config, &["index", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown dataset"), "{}", stderr);
}

/// Every text embeds to the same vector, so similarity ties at 1.0 and
/// only the policy boost decides the order.
fn ollama_env(server: &mockito::Server) -> (TempDir, PathBuf) {
    setup_test_env(&format!(
        "[embedding]\nprovider = \"ollama\"\nmodel = \"test-embed\"\ndims = 3\nurl = \"{}\"\nmax_retries = 0\n",
        server.url()
    ))
}

#[test]
fn search_boosts_policy_sources_end_to_end() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("POST", "/api/embed")
        .with_status(200)
        .with_body(r#"{"embeddings":[[1.0,0.0,0.0]]}"#)
        .create();
    let (_tmp, config) = ollama_env(&server);

    // Website first so it has the lower id.
    assert!(run(&config, &["index", "website"]).2);
    let (stdout, stderr, ok) = run(&config, &["index", "manifesto"]);
    assert!(ok, "{}", stderr);
    // "Short." is under min_chars and is stored without a vector.
    assert!(stdout.contains("embeddings skipped: 1"), "{}", stdout);

    let (stdout, stderr, ok) = run(&config, &["search", "housing", "--json"]);
    assert!(ok, "{}", stderr);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    let keys: Vec<String> = results
        .iter()
        .map(|r| {
            format!(
                "{}:{}",
                r["source_type"].as_str().unwrap(),
                r["chunk_id"].as_str().unwrap()
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec!["manifesto:housing-1", "manifesto:transport-1", "website-page:about"]
    );
    assert!(results[0].get("embedding").is_none());
    assert_eq!(results[0]["boosted"], true);
    assert_eq!(results[2]["boosted"], false);

    let (stdout, _, ok) = run(&config, &["search", "housing", "--json", "--no-boost"]);
    assert!(ok);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results[0]["chunk_id"], "about");
}

#[test]
fn check_command_exit_status() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("POST", "/api/embed")
        .with_status(200)
        .with_body(r#"{"embeddings":[[1.0,0.0,0.0]]}"#)
        .create();
    let (tmp, config) = ollama_env(&server);
    assert!(run(&config, &["index", "all"]).2);

    let passing = tmp.path().join("pass.toml");
    fs::write(
        &passing,
        "[[check]]\nname = \"housing\"\nquery = \"housing\"\nexpect = [\"manifesto:housing-1\"]\nforbid = [\"manifesto:tiny\"]\n",
    )
    .unwrap();
    let (stdout, stderr, ok) = run(&config, &["check", passing.to_str().unwrap()]);
    assert!(ok, "{}\n{}", stdout, stderr);
    assert!(stdout.contains("PASS housing"));

    let failing = tmp.path().join("fail.toml");
    fs::write(
        &failing,
        "[[check]]\nname = \"top1\"\nquery = \"housing\"\nexpect = [\"website-page:about\"]\ntop_k = 1\n",
    )
    .unwrap();
    let (stdout, _, ok) = run(&config, &["check", failing.to_str().unwrap()]);
    assert!(!ok);
    assert!(stdout.contains("FAIL top1"), "{}", stdout);
    assert!(stdout.contains("missing: website-page:about"));
}
