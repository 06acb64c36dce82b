//! Integration tests for logging helpers and configuration

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true)
        .with_filter("core_sync=trace");

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert_eq!(config.filter.as_deref(), Some("core_sync=trace"));
}

#[test]
fn test_defaults_redact() {
    let config = LoggingConfig::default();
    assert!(config.redact_pii);
    assert_eq!(config.level, LogLevel::Info);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("authorization", "Bearer abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("api_key", "k-123"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("session_token", "t"), "[REDACTED]");
}

#[test]
fn test_emails_keep_first_character() {
    let redacted = redact_if_sensitive("owner", "ana@example.com");
    assert!(redacted.starts_with('a'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_item_ids_pass_through_user_ids_do_not() {
    assert_eq!(redact_if_sensitive("item_id", "IMG_0001"), "IMG_0001");
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "[REDACTED]");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/home/ana/Pictures/IMG_0001.jpg"), "IMG_0001.jpg");
    assert_eq!(strip_path("C:\\Users\\Ana\\Pictures\\a.png"), "a.png");
    assert_eq!(strip_path("content://media/external/images/42"), "42");
    assert_eq!(strip_path("IMG_0001.jpg"), "IMG_0001.jpg");
    assert_eq!(strip_path("/var/cache/"), "");
}
