use super::types::*;
use super::ProxyConfig;
use std::path::Path;

#[test]
fn test_defaults_when_file_missing() {
    let cfg = ProxyConfig::load(Path::new("/nonexistent/wiretap.toml")).unwrap();
    assert_eq!(cfg.server.listen, "127.0.0.1:8080");
    assert!(cfg.capture.enabled);
    assert_eq!(cfg.capture.dir, "capture");
    assert_eq!(cfg.upstream.connect_timeout_secs, 0);
}

#[test]
fn test_load_toml_config() {
    let toml = r#"
        [server]
        listen = "0.0.0.0:3128"

        [capture]
        enabled = false
        dir = "/tmp/bodies"

        [upstream]
        connect_timeout_secs = 5
    "#;
    let tmp = std::env::temp_dir().join("wiretap_test_config.toml");
    std::fs::write(&tmp, toml).unwrap();
    let cfg = ProxyConfig::load(&tmp).unwrap();
    assert_eq!(cfg.server.listen, "0.0.0.0:3128");
    assert!(!cfg.capture.enabled);
    assert_eq!(cfg.capture.dir, "/tmp/bodies");
    assert_eq!(cfg.upstream.connect_timeout_secs, 5);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "server": { "listen": "127.0.0.1:8888" },
        "capture": { "dir": "/tmp/wiretap-bodies" }
    }"#;
    let tmp = std::env::temp_dir().join("wiretap_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = ProxyConfig::load(&tmp).unwrap();
    assert_eq!(cfg.server.listen, "127.0.0.1:8888");
    assert_eq!(cfg.capture.dir, "/tmp/wiretap-bodies");
    // untouched sections fall back to defaults
    assert_eq!(cfg.server.admin_listen, "127.0.0.1:9091");
    assert!(cfg.capture.enabled);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_unsupported_extension_fails() {
    let tmp = std::env::temp_dir().join("wiretap_test_config.yaml");
    std::fs::write(&tmp, "listen: nope").unwrap();
    assert!(ProxyConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_empty_listen_fails() {
    let cfg = ProxyConfig {
        server: ServerConfig {
            listen: "".into(),
            admin_listen: "127.0.0.1:9091".into(),
        },
        capture: CaptureConfig::default(),
        upstream: UpstreamConfig::default(),
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_empty_capture_dir_fails_only_when_enabled() {
    let mut cfg = ProxyConfig {
        server: ServerConfig::default(),
        capture: CaptureConfig {
            enabled: true,
            dir: "".into(),
        },
        upstream: UpstreamConfig::default(),
    };
    assert!(cfg.validate().is_err());

    cfg.capture.enabled = false;
    assert!(cfg.validate().is_ok());
}
