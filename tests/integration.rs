use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cfml_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cfml");
    path
}

const CORPUS: &str = r#"{
  "monedas": [
    {"id": "es-1c-1999", "denominacion": "1 cent", "pais": "Spain", "anio_emision": 1999, "anverso": "Cathedral of Santiago", "tags": ["copper", "small"]},
    {"id": "es-1c-2002", "denominacion": "1 cent", "pais": "Spain", "anio_emision": 2002, "anverso": "Cathedral of Santiago", "tags": ["copper"]},
    {"id": "fr-1c-2001", "denominacion": "1 cent", "pais": "France", "anverso": "Marianne", "tags": ["copper", "small"]},
    {"id": "it-2e-2002", "denominacion": "2 euro", "pais": "Italy", "anverso": "Dante Alighieri", "tags": ["bimetallic"]},
    {"id": "it-2e-2012", "denominacion": "2 euro", "pais": "Italy", "anverso": "Dante Alighieri", "tags": ["bimetallic", "commemorative"]},
    {"id": "de-2e-2006", "denominacion": "2 euro", "pais": "Germany", "anverso": "Holstentor", "tags": ["bimetallic", "commemorative"]},
    {"id": "fr-50c-1999", "denominacion": "50 cent", "pais": "France", "anverso": "Sower", "tags": ["nordic gold"]},
    {"id": "es-50c-2000", "denominacion": "50 cent", "pais": "Spain", "anverso": "Cervantes", "tags": ["nordic gold"]},
    {"id": "it-50c-2008", "denominacion": "50 cent", "pais": "Italy", "anverso": "Marcus Aurelius", "tags": ["nordic gold"]}
  ]
}"#;

fn setup_test_env(corpus: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("dataset.json"), corpus).unwrap();

    let config_content = format!(
        r#"[paths]
dataset = "{root}/dataset.json"
embeddings = "{root}/out/text_embeddings.json"
labels = "{root}/out/processed/labels.csv"
model = "{root}/out/model_text.json"

[embedding]
backend = "lexical"

[training]
seed = 7
"#,
        root = root.display()
    );

    let config_path = config_dir.join("cfml.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cfml(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cfml_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cfml binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_embed_writes_artifacts() {
    let (tmp, config_path) = setup_test_env(CORPUS);

    let (stdout, stderr, success) = run_cfml(&config_path, &["embed"]);
    assert!(success, "embed failed: {}", stderr);
    assert!(stdout.contains("lexical"));
    assert!(stdout.contains("(9, "));

    let out = tmp.path().join("out");
    assert!(out.join("text_embeddings.json").exists());
    assert!(out.join("vectorizer.json").exists());
    assert!(!out.join("encoder.json").exists());

    let labels = fs::read_to_string(out.join("processed/labels.csv")).unwrap();
    let mut lines = labels.lines();
    assert_eq!(lines.next(), Some("filename,label"));
    assert_eq!(lines.next(), Some("es-1c-1999,1 cent"));
    assert_eq!(labels.lines().count(), 10);
}

#[test]
fn test_train_then_predict() {
    let (tmp, config_path) = setup_test_env(CORPUS);

    let (_, stderr, success) = run_cfml(&config_path, &["embed"]);
    assert!(success, "embed failed: {}", stderr);

    let (stdout, stderr, success) = run_cfml(&config_path, &["train"]);
    assert!(success, "train failed: {}", stderr);
    assert!(stdout.contains("stratified"));
    assert!(stdout.contains("weighted avg"));
    assert!(tmp.path().join("out/model_text.json").exists());

    let (stdout, stderr, success) = run_cfml(&config_path, &["predict", "--id", "it-2e-2012"]);
    assert!(success, "predict --id failed: {}", stderr);
    assert!(stdout.contains("Input text: 2 euro Italy"));
    assert!(stdout.contains("Prediction:"));
    // three classes, top-3
    assert_eq!(stdout.lines().filter(|l| l.starts_with("  ")).count(), 3);

    let (stdout, stderr, success) =
        run_cfml(&config_path, &["predict", "--text", "nordic gold Cervantes"]);
    assert!(success, "predict --text failed: {}", stderr);
    assert!(stdout.contains("Input text: nordic gold Cervantes"));
}

#[test]
fn test_predict_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env(CORPUS);
    assert!(run_cfml(&config_path, &["pipeline"]).2);

    let (_, stderr, success) = run_cfml(&config_path, &["predict", "--id", "xx-0"]);
    assert!(!success);
    assert!(stderr.contains("id not found"));
}

#[test]
fn test_predict_without_input_fails() {
    let (_tmp, config_path) = setup_test_env(CORPUS);
    assert!(run_cfml(&config_path, &["pipeline"]).2);

    let (_, stderr, success) = run_cfml(&config_path, &["predict"]);
    assert!(!success);
    assert!(stderr.contains("provide text or id"));
}

#[test]
fn test_predict_without_model_fails() {
    let (_tmp, config_path) = setup_test_env(CORPUS);
    let (_, stderr, success) = run_cfml(&config_path, &["predict", "--text", "2 euro"]);
    assert!(!success);
    assert!(stderr.contains("artifact not found"));
}

#[test]
fn test_embed_empty_corpus_fails() {
    let (tmp, config_path) = setup_test_env(r#"{"monedas": []}"#);
    let (_, stderr, success) = run_cfml(&config_path, &["embed"]);
    assert!(!success);
    assert!(stderr.contains("no entries found"));
    assert!(!tmp.path().join("out/text_embeddings.json").exists());
}

#[test]
fn test_unknown_backend_rejected() {
    let (_tmp, config_path) = setup_test_env(CORPUS);
    let (_, stderr, success) = run_cfml(&config_path, &["embed", "--backend", "bogus"]);
    assert!(!success);
    assert!(stderr.contains("unknown embedding backend"));
}
