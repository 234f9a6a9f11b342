//! Integration tests for the CLI commands.
//!
//! Model calls are answered from a `--responses` file so no API key is needed.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const INVOICE_TEXT: &str = "INVOICE\n\
    Invoice Number: INV-001\n\
    Invoice Date: 2024-03-15\n\
    Bill To: XYZ Ltd\n\
    Acme Corp, 1 Main St\n\
    Subtotal: $90.00\n\
    Sales tax: $10.00\n\
    Total due: $100.00\n";

const INVOICE_REPLY: &str = r#"[{
    "invoice_number": "INV-001",
    "invoice_date": "2024-03-15",
    "vendor_name": "Acme Corp",
    "customer_name": "XYZ Ltd",
    "subtotal": 90.00,
    "tax": 10.00,
    "total": 100.00
}]"#;

/// CLI command with the user config directory pointed into `home`.
fn cli(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_docex"));
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("HOME", home.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("revalidate"));
}

#[test]
fn test_schemas_list() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["schemas", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("invoice"))
        .stdout(predicate::str::contains("bill"))
        .stdout(predicate::str::contains("prescription"))
        .stdout(predicate::str::contains("unknown"));
}

#[test]
fn test_schemas_show() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["schemas", "show", "invoice"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(schema["document_type"], "invoice");
    assert!(
        schema["fields"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["name"] == "total")
    );
}

#[test]
fn test_schemas_show_rejects_unknown_type() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["schemas", "show", "receipt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown document type"));
}

#[test]
fn test_config_init_get_set() {
    let home = TempDir::new().unwrap();

    cli(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not created"));

    cli(&home).args(["config", "init"]).assert().success();
    assert!(home.path().join("config/docex/config.json").exists());

    cli(&home)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    cli(&home)
        .args(["config", "set", "extraction.self_consistency_runs", "5"])
        .assert()
        .success();

    cli(&home)
        .args(["config", "get", "extraction.self_consistency_runs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));
}

#[test]
fn test_config_set_rejects_invalid_value() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["config", "set", "extraction.self_consistency_runs", "0"])
        .assert()
        .failure();

    cli(&home)
        .args(["config", "set", "extraction.no_such_key", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_process_text_file() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", INVOICE_TEXT);
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);

    let output = cli(&home)
        .arg("process")
        .arg(&input)
        .arg("--responses")
        .arg(&responses)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["document_type"], "invoice");
    assert_eq!(result["fields"]["invoice_number"], "INV-001");
    assert_eq!(result["agreement"]["invoice_number"]["votes"], 3);
    assert_eq!(result["retry_count"], 0);
}

#[test]
fn test_process_csv_to_file() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", INVOICE_TEXT);
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);
    let output_path = home.path().join("out.csv");

    cli(&home)
        .arg("process")
        .arg(&input)
        .args(["--no-self-consistency", "-f", "csv", "-o"])
        .arg(&output_path)
        .arg("--responses")
        .arg(&responses)
        .assert()
        .success()
        .stdout(predicate::str::contains("Output written"));

    let csv = fs::read_to_string(&output_path).unwrap();
    assert!(csv.starts_with("field,value,confidence,low_confidence,agreement"));
    assert!(csv.contains("invoice_number,INV-001,"));
    assert!(csv.contains(",1/1"));
}

#[test]
fn test_process_with_timeout() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", INVOICE_TEXT);
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);

    cli(&home)
        .arg("process")
        .arg(&input)
        .args(["--timeout", "30", "--responses"])
        .arg(&responses)
        .assert()
        .success()
        .stdout(predicate::str::contains("INV-001"));

    cli(&home)
        .arg("process")
        .arg(&input)
        .args(["--timeout", "0", "--responses"])
        .arg(&responses)
        .assert()
        .failure();
}

#[test]
fn test_process_without_api_key() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", INVOICE_TEXT);

    cli(&home)
        .env_remove("GEMINI_API_KEY")
        .arg("process")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_process_missing_input() {
    let home = TempDir::new().unwrap();
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);

    cli(&home)
        .args(["process", "does-not-exist.pdf", "--responses"])
        .arg(&responses)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_revalidate_edits() {
    let home = TempDir::new().unwrap();
    let input = write(home.path(), "invoice.txt", INVOICE_TEXT);
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);
    let saved = home.path().join("result.json");

    cli(&home)
        .arg("process")
        .arg(&input)
        .arg("-o")
        .arg(&saved)
        .arg("--responses")
        .arg(&responses)
        .assert()
        .success();

    let output = cli(&home)
        .arg("revalidate")
        .arg(&saved)
        .args(["--set", "vendor_name=Acme Corporation"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["fields"]["vendor_name"], "Acme Corporation");
    assert_eq!(result["field_confidence"]["vendor_name"]["score"], 1.0);

    cli(&home)
        .arg("revalidate")
        .arg(&saved)
        .args(["--clear", "invoice_number"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 validation errors remain"));

    cli(&home)
        .arg("revalidate")
        .arg(&saved)
        .args(["--set", "po_number=42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("po_number"));
}

#[test]
fn test_batch_with_summary() {
    let home = TempDir::new().unwrap();
    let docs = home.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    write(&docs, "a.txt", INVOICE_TEXT);
    write(&docs, "b.txt", INVOICE_TEXT);
    write(&docs, "empty.txt", "   \n");
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);
    let out_dir = home.path().join("out");

    cli(&home)
        .arg("batch")
        .arg(format!("{}/*.txt", docs.display()))
        .arg("-o")
        .arg(&out_dir)
        .args(["--summary", "--continue-on-error", "--runs", "1"])
        .arg("--responses")
        .arg(&responses)
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 3 files"))
        .stdout(predicate::str::contains("Failed files:"));

    assert!(out_dir.join("a.json").exists());
    assert!(out_dir.join("b.json").exists());
    assert!(!out_dir.join("empty.json").exists());

    let summary = fs::read_to_string(out_dir.join("summary.csv")).unwrap();
    let mut lines = summary.lines();
    assert!(lines.next().unwrap().starts_with("filename,status,document_type"));
    assert!(lines.next().unwrap().starts_with("a.txt,success,invoice,"));
    assert!(lines.next().unwrap().starts_with("b.txt,success,invoice,"));
    assert!(lines.next().unwrap().starts_with("empty.txt,error,"));
}

#[test]
fn test_batch_stops_on_first_error() {
    let home = TempDir::new().unwrap();
    let docs = home.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    write(&docs, "empty.txt", "");
    let responses = write(home.path(), "responses.json", INVOICE_REPLY);

    cli(&home)
        .arg("batch")
        .arg(format!("{}/*.txt", docs.display()))
        .arg("--responses")
        .arg(&responses)
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty.txt"));
}
