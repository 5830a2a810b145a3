//! Integration tests driving the mkvdedup binary.

mod common;

use common::{media, write};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Run mkvdedup with given args
fn run_mkvdedup(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_mkvdedup"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to run mkvdedup");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_build_info_cat_verify() {
    let dir = TempDir::new().unwrap();
    let file = media(31, 3, 6, 1200);
    let a = write(dir.path(), "a.mkv", &file);
    let b = write(dir.path(), "b.mkv", &file);
    let dedup = dir.path().join("b.dedup");
    let out = dir.path().join("b.out");

    let (stdout, stderr, ok) = run_mkvdedup(&["-q", "build", arg(&a), arg(&b), "-o", arg(&dedup)]);
    assert!(ok, "build failed: {stderr}");
    assert!(stdout.contains("Entries:          1"));

    let (stdout, _, ok) = run_mkvdedup(&["info", arg(&dedup), "--json"]);
    assert!(ok);
    let info: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(info["entry_count"], 1);
    assert_eq!(info["logical_size"], file.len() as u64);
    assert_eq!(info["sources"][0]["referenced_bytes"], file.len() as u64);

    let (_, stderr, ok) = run_mkvdedup(&["cat", arg(&dedup), "-o", arg(&out)]);
    assert!(ok, "cat failed: {stderr}");
    assert_eq!(fs::read(&out).unwrap(), file);

    let (_, _, ok) = run_mkvdedup(&["-q", "verify", arg(&dedup)]);
    assert!(ok);
}

#[test]
fn test_cat_range() {
    let dir = TempDir::new().unwrap();
    let file = media(32, 2, 4, 900);
    let a = write(dir.path(), "a.mkv", &file);
    let dedup = dir.path().join("a.dedup");
    let out = dir.path().join("slice");

    let (_, stderr, ok) = run_mkvdedup(&["-q", "build", arg(&a), "-o", arg(&dedup)]);
    assert!(ok, "{stderr}");
    let (_, _, ok) = run_mkvdedup(&[
        "cat", arg(&dedup), "--offset", "100", "--length", "500", "-o", arg(&out),
    ]);
    assert!(ok);
    assert_eq!(fs::read(&out).unwrap(), &file[100..600]);
}

#[test]
fn test_verify_fails_on_tampered_source() {
    let dir = TempDir::new().unwrap();
    let file = media(33, 2, 4, 900);
    let a = write(dir.path(), "a.mkv", &file);
    let b = write(dir.path(), "b.mkv", &file);
    let dedup = dir.path().join("b.dedup");
    let (_, _, ok) = run_mkvdedup(&["-q", "build", arg(&a), arg(&b), "-o", arg(&dedup)]);
    assert!(ok);

    let mut tampered = file.clone();
    tampered[10] ^= 0x55;
    fs::write(&a, &tampered).unwrap();

    let (stdout, _, ok) = run_mkvdedup(&["-q", "verify", arg(&dedup), "--json"]);
    assert!(!ok);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["mismatches"].as_array().unwrap().len(), 1);
}

#[test]
fn test_chunks_lists_frames() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.mkv", &media(34, 2, 5, 300));

    let (stdout, _, ok) = run_mkvdedup(&["chunks", arg(&a), "--json"]);
    assert!(ok);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["chunks"].as_array().unwrap().len(), 10);
    assert!(value["error"].is_null());
}

#[test]
fn test_build_rejects_corrupt_source() {
    let dir = TempDir::new().unwrap();
    let mut bad = media(35, 1, 3, 300);
    bad.truncate(bad.len() - 3);
    let a = write(dir.path(), "bad.mkv", &bad);
    let dedup = dir.path().join("bad.dedup");

    let (_, stderr, ok) = run_mkvdedup(&["-q", "build", arg(&a), "-o", arg(&dedup)]);
    assert!(!ok);
    assert!(stderr.contains("corrupt"));
    assert!(!dedup.exists());
}
