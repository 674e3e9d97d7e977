//! Tests for validation and file utilities

use crate::utils::{
    cleanup_old_files, format_file_size, mask_secret, validate_hex_color, validate_service_url,
    validate_upload_file, UPLOAD_SIZE_LIMIT_STANDARD,
};
use tempfile::TempDir;

#[test]
fn test_validate_hex_color() {
    assert!(validate_hex_color("#fff"));
    assert!(validate_hex_color("#fffa"));
    assert!(validate_hex_color("#1f77b4"));
    assert!(validate_hex_color("#1f77b4ff"));
    assert!(validate_hex_color("#ABCDEF"));

    assert!(!validate_hex_color("1f77b4"));
    assert!(!validate_hex_color("#12345"));
    assert!(!validate_hex_color("#gggggg"));
    assert!(!validate_hex_color(""));
    assert!(!validate_hex_color("#"));
}

#[test]
fn test_validate_service_url() {
    assert!(validate_service_url("https://analytics.example.com"));
    assert!(validate_service_url("http://analytics.example.com:8181/base"));

    assert!(!validate_service_url(""));
    assert!(!validate_service_url("ftp://example.com"));
    assert!(!validate_service_url("https://localhost:8181"));
    assert!(!validate_service_url("http://127.0.0.1"));
    assert!(!validate_service_url("http://192.168.1.10"));
    assert!(!validate_service_url("http://10.0.0.1"));
    assert!(!validate_service_url("https://example.com/../../etc/passwd"));
    assert!(!validate_service_url(&format!(
        "https://example.com/{}",
        "a".repeat(2100)
    )));
}

#[test]
fn test_validate_upload_file_missing() {
    let result = validate_upload_file(std::path::Path::new("/no/such/file.png"), false);
    assert!(!result.valid);
    assert!(result.error.unwrap().contains("does not exist"));
}

#[test]
fn test_validate_upload_file_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.png");
    std::fs::write(&path, b"").unwrap();

    let result = validate_upload_file(&path, false);
    assert!(!result.valid);
    assert!(result.error.unwrap().contains("empty"));
}

#[test]
fn test_validate_upload_file_bad_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.bmp");
    std::fs::write(&path, b"data").unwrap();

    let result = validate_upload_file(&path, false);
    assert!(!result.valid);
    assert!(result.error.unwrap().contains("Unsupported"));
}

#[test]
fn test_validate_upload_file_ok() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.PNG");
    std::fs::write(&path, b"fake image bytes").unwrap();

    let result = validate_upload_file(&path, false);
    assert!(result.valid, "{:?}", result.error);
    assert_eq!(result.size, Some(16));
}

#[test]
fn test_validate_upload_file_size_limits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.png");
    let oversized = vec![0u8; (UPLOAD_SIZE_LIMIT_STANDARD + 1) as usize];
    std::fs::write(&path, &oversized).unwrap();

    let standard = validate_upload_file(&path, false);
    assert!(!standard.valid);
    assert!(standard.error.unwrap().contains("too large"));

    // The same file fits under elevated limits
    let elevated = validate_upload_file(&path, true);
    assert!(elevated.valid);
}

#[test]
fn test_format_file_size() {
    assert_eq!(format_file_size(512), "512 B");
    assert_eq!(format_file_size(2048), "2.0 KB");
    assert_eq!(format_file_size(8 * 1024 * 1024), "8.0 MB");
}

#[test]
fn test_cleanup_keeps_fresh_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.png");
    std::fs::write(&path, b"data").unwrap();

    let removed = cleanup_old_files(dir.path(), 7).unwrap();
    assert_eq!(removed, 0);
    assert!(path.exists());
}

#[test]
fn test_cleanup_missing_directory() {
    let removed = cleanup_old_files(std::path::Path::new("/no/such/dir"), 7).unwrap();
    assert_eq!(removed, 0);
}

#[test]
fn test_mask_secret() {
    assert_eq!(mask_secret("abc"), "****");
    assert_eq!(mask_secret("abcdefgh"), "****efgh");
}
