//! Tests for error handling

use lostmode_config::ConfigError;
use std::io;

/// Test ConfigError::Io displays correctly
#[test]
fn test_io_error_display() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
    let err = ConfigError::Io(io_err);

    let display = format!("{}", err);
    assert!(display.contains("STORAGE FAULT"));
    assert!(display.contains("file not found"));
}

/// Test ConfigError::Json displays correctly
#[test]
fn test_json_error_display() {
    let json_err: serde_json::Error =
        serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err = ConfigError::Json(json_err);

    let display = format!("{}", err);
    assert!(display.contains("CORRUPTED RECORD"));
}

/// Test ConfigError implements std::error::Error
#[test]
fn test_error_trait() {
    fn check_error_trait<T: std::error::Error>() {}
    check_error_trait::<ConfigError>();
}

/// Test ConfigError::Io from io::Error conversion
#[test]
fn test_io_error_from() {
    let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "no permission");
    let err: ConfigError = io_err.into();

    match err {
        ConfigError::Io(_) => (),
        _ => panic!("Expected Io variant"),
    }
}

/// Test ConfigError::Json from serde_json::Error conversion
#[test]
fn test_json_error_from() {
    let result: Result<serde_json::Value, _> = serde_json::from_str("{ invalid json");
    let err: ConfigError = result.unwrap_err().into();

    match err {
        ConfigError::Json(_) => (),
        _ => panic!("Expected Json variant"),
    }
}
