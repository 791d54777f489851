//! Integration tests for the clinitree CLI
//!
//! These tests exercise the full CLI workflow using a temporary database.
//! They verify that commands work end-to-end without mocking.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper to run clinitree CLI with a specific database path
fn run_clinitree(args: &[&str], db_path: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_clinitree"))
        .args(args)
        .env("CLINITREE_DB_PATH", db_path)
        .env_remove("CLINITREE_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute clinitree")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Run a command that must succeed and return its stdout
fn ok(args: &[&str], db_path: &Path) -> String {
    let output = run_clinitree(args, db_path);
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        stderr(&output)
    );
    stdout(&output)
}

fn temp_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}

/// Cervical tree: question 1 -> (Oui) tests 2, (Non) diagnosis 3
fn build_sample_tree(db_path: &Path) {
    ok(&["tree", "add", "cervical", "Cervicalgie", "-d", "Douleur cervicale"], db_path);
    ok(&["node", "question", "1", "Irradiation dans le bras ?"], db_path);
    ok(&["node", "tests", "1", "--tests", "4,5", "-p", "1"], db_path);
    ok(&["node", "diagnosis", "1", "--pathologies", "7", "-p", "1"], db_path);
    ok(&["answer", "add", "1", "Oui", "-n", "2"], db_path);
    ok(&["answer", "add", "1", "Non", "-n", "3"], db_path);
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_clinitree"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("clinitree"));
    assert!(out.contains("decision trees"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_clinitree"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("clinitree"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_clinitree"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion zsh failed: {}",
        stderr(&output)
    );
    assert!(
        stdout(&output).contains("#compdef clinitree"),
        "zsh completion should contain #compdef"
    );
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_clinitree"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(
        stdout(&output).contains("_clinitree"),
        "bash completion should contain _clinitree function"
    );
}

// =============================================================================
// Zone Tests
// =============================================================================

#[test]
fn test_zones_are_listed() {
    let (_dir, db_path) = temp_db();
    let out = ok(&["zones"], &db_path);
    assert_eq!(out.lines().count(), 11);
    assert!(out.contains("cervical"));
    assert!(out.contains("Épaule"));
}

#[test]
fn test_info_shows_database_path() {
    let (_dir, db_path) = temp_db();
    let out = ok(&["info"], &db_path);
    assert!(out.contains("test.db"));
    assert!(out.contains("decision-trees"));
}

// =============================================================================
// Tree Tests
// =============================================================================

#[test]
fn test_add_and_list_trees() {
    let (_dir, db_path) = temp_db();

    let out = ok(&["tree", "add", "cervical", "Torticolis"], &db_path);
    assert!(out.contains("Created tree 1"));
    ok(&["tree", "add", "genou", "Gonalgie"], &db_path);

    let out = ok(&["tree", "list"], &db_path);
    assert!(out.contains("Torticolis"));
    assert!(out.contains("Gonalgie"));

    let out = ok(&["tree", "list", "-z", "genou"], &db_path);
    assert!(out.contains("Gonalgie"));
    assert!(!out.contains("Torticolis"));
}

#[test]
fn test_unknown_zone_is_an_error() {
    let (_dir, db_path) = temp_db();
    let output = run_clinitree(&["tree", "add", "tail", "Nope"], &db_path);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unknown region 'tail'"));
}

#[test]
fn test_edit_and_remove_tree() {
    let (_dir, db_path) = temp_db();
    ok(&["tree", "add", "cervical", "Torticolis", "-d", "old"], &db_path);
    ok(&["tree", "edit", "1", "-n", "Torticolis aigu", "--clear-description"], &db_path);

    let out = ok(&["tree", "show", "1"], &db_path);
    assert!(out.starts_with("Torticolis aigu (tree 1)\n"));

    ok(&["tree", "rm", "1"], &db_path);
    let output = run_clinitree(&["tree", "show", "1"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("tree 1 not found"));
}

// =============================================================================
// Node and Answer Tests
// =============================================================================

#[test]
fn test_show_outline() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let out = ok(&["tree", "show", "1"], &db_path);
    assert!(out.contains("[1] ? Irradiation dans le bras ?"));
    assert!(out.contains("- Oui -> [2]"));
    assert!(out.contains("[2] Tx tests [4, 5] clusters []"));
    assert!(out.contains("[3] Dx pathologies [7]"));
}

#[test]
fn test_show_json() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let out = ok(&["tree", "show", "1", "--json"], &db_path);
    let json: serde_json::Value = serde_json::from_str(&out).expect("Output should be valid JSON");
    assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(json["answers"].as_array().unwrap().len(), 2);
    assert_eq!(json["nodes"][0]["type"], "question");
}

#[test]
fn test_answers_only_on_questions() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let output = run_clinitree(&["answer", "add", "3", "Oui"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("answers belong to question nodes"));
}

#[test]
fn test_node_rm_cascades() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let out = ok(&["node", "rm", "1"], &db_path);
    assert!(out.contains("3 node(s) removed"));
    let out = ok(&["tree", "show", "1"], &db_path);
    assert!(out.contains("(no nodes)"));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_validate_clean_tree() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let output = run_clinitree(&["validate", "1"], &db_path);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
    assert!(stdout(&output).contains("Cervicalgie"));
}

#[test]
fn test_validate_reports_defects_with_exit_code_2() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);
    ok(&["answer", "edit", "2", "--clear-next"], &db_path);
    ok(&["node", "diagnosis", "1", "-p", "2"], &db_path);

    let output = run_clinitree(&["validate", "1"], &db_path);
    assert_eq!(output.status.code(), Some(2));
    let out = stdout(&output);
    assert!(out.contains("no next node"));
    assert!(out.contains("missing pathology"));
}

#[test]
fn test_validate_json() {
    let (_dir, db_path) = temp_db();
    ok(&["tree", "add", "pied", "Talalgie"], &db_path);
    ok(&["node", "question", "1", "Douleur matinale ?"], &db_path);

    let output = run_clinitree(&["validate", "--json"], &db_path);
    assert_eq!(output.status.code(), Some(2));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json[0]["valid"], false);
    assert_eq!(json[0]["defects"][0]["kind"], "dead_end_question");
}

// =============================================================================
// Export Tests
// =============================================================================

#[test]
fn test_dot_export() {
    let (_dir, db_path) = temp_db();
    build_sample_tree(&db_path);

    let out = ok(&["dot", "1"], &db_path);
    assert!(out.contains("digraph"));
    assert!(out.contains("Irradiation"));
    assert!(out.contains("1 -> 2"));
}

#[test]
fn test_bundle_export_and_import() {
    let (dir, db_path) = temp_db();
    build_sample_tree(&db_path);
    let bundle_path = dir.path().join("cervicalgie.json");
    let bundle = bundle_path.to_str().unwrap();

    ok(&["bundle", "export", "1", "-o", bundle], &db_path);
    assert!(Path::new(bundle).exists());

    let out = ok(&["bundle", "import", bundle, "--dry-run"], &db_path);
    assert!(out.contains("Would import 3 nodes, 2 answers"));

    let out = ok(&["bundle", "import", bundle, "-z", "lombaire"], &db_path);
    assert!(out.contains("Imported tree 2"));

    let out = ok(&["tree", "list", "-z", "lombaire"], &db_path);
    assert!(out.contains("Cervicalgie"));
    let output = run_clinitree(&["validate", "2"], &db_path);
    assert_eq!(output.status.code(), Some(0));
}

// =============================================================================
// Catalog Tests
// =============================================================================

#[test]
fn test_catalog_add_and_list() {
    let (_dir, db_path) = temp_db();
    ok(&["catalog", "add", "test", "Spurling", "-z", "cervical"], &db_path);
    ok(&["catalog", "add", "test", "Distraction"], &db_path);
    let out = ok(&["catalog", "add", "cluster", "Radiculopathie", "--tests", "1,2"], &db_path);
    assert!(out.contains("Created cluster 1"));

    let out = ok(&["catalog", "list", "cluster"], &db_path);
    assert!(out.contains("Radiculopathie [1, 2]"));

    let out = ok(&["catalog", "list", "test", "-z", "cervical"], &db_path);
    assert!(out.contains("Spurling"));
    assert!(!out.contains("Distraction"));
}
