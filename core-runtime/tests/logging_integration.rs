//! Integration tests for the logging helpers
//!
//! Covers:
//! - release/debug defaults of `LoggingConfig`
//! - scrubbing of signed media URLs and local cache paths
//! - credential-like field names

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    redact_if_sensitive, redact_url, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_defaults_follow_build_profile() {
    let config = LoggingConfig::default();

    assert_eq!(config.level, LogLevel::Info);
    assert!(config.redact_pii);
    assert!(config.logger_sink.is_none());
    assert!(config.filter.is_none());

    let expected = if cfg!(debug_assertions) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    assert_eq!(config.format, expected);
}

#[test]
fn test_signed_cdn_urls_keep_only_location() {
    for url in [
        "https://cdn.example.com/m1.mp4?X-Amz-Credential=abc&X-Amz-Signature=def",
        "https://edge.example.net/hls/m1/seg-004.ts?token=abc&expires=def",
    ] {
        let redacted = redact_url(url);
        let (location, _) = url.split_once('?').unwrap();
        assert!(redacted.starts_with(location), "{}", redacted);
        assert!(!redacted.contains("abc"));
        assert!(!redacted.contains("def"));
    }

    assert_eq!(
        redact_url("https://cdn.example.com/m1.mp4"),
        "https://cdn.example.com/m1.mp4"
    );
}

#[test]
fn test_cache_paths_reduce_to_file_name() {
    let cases = [
        ("/var/lib/app/media/retained/6d31", "6d31"),
        ("C:\\Users\\Jo\\AppData\\media\\staging\\6d31.part", "6d31.part"),
        ("6d31", "6d31"),
        ("", ""),
    ];
    for (path, expected) in cases {
        assert_eq!(strip_path(path), expected);
    }
}

#[test]
fn test_only_secret_fields_are_redacted() {
    for key in ["access_token", "cdn_signature", "password", "api_key"] {
        assert_eq!(redact_if_sensitive(key, "v"), "[REDACTED]", "{}", key);
    }
    for key in ["content_id", "bytes_transferred", "state"] {
        assert_eq!(redact_if_sensitive(key, "v"), "v", "{}", key);
    }
}

#[test]
fn test_release_config_for_host_pipeline() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_filter("core_offline=debug,sqlx=warn");

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert_eq!(config.filter.as_deref(), Some("core_offline=debug,sqlx=warn"));
}
