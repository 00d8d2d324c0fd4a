use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use host_forward::config::{CONFIG_FILE_ENV, Config, TlsMaterial};

fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_source(|key| vars.get(key).cloned())
}

#[test]
fn test_config_defaults() {
    let cfg = load(&[]).unwrap();

    assert_eq!(cfg.listen_host, "0.0.0.0");
    assert_eq!(cfg.http_port, 8080);
    assert_eq!(cfg.https_port, None);
    assert!(cfg.strict_tls);
    assert!(!cfg.ssrf_dns_fail_closed);
    assert_eq!(cfg.http_addr().unwrap().to_string(), "0.0.0.0:8080");
    assert_eq!(cfg.tls_material(), TlsMaterial::Disabled);
}

#[test]
fn test_config_from_env() {
    let cfg = load(&[
        ("LISTEN_HOST", "127.0.0.1"),
        ("HTTP_PORT", "3000"),
        ("HTTPS_PORT", "3443"),
        ("HTTPS_CERT_PATH", "/etc/tls/cert.pem"),
        ("HTTPS_KEY_PATH", "/etc/tls/key.pem"),
        ("PROXY_REJECT_UNAUTHORIZED", "false"),
        ("SSRF_DNS_FAIL_CLOSED", "true"),
    ])
    .unwrap();

    assert_eq!(cfg.http_addr().unwrap().to_string(), "127.0.0.1:3000");
    assert_eq!(cfg.https_addr().unwrap().unwrap().to_string(), "127.0.0.1:3443");
    assert!(!cfg.strict_tls);
    assert!(cfg.ssrf_dns_fail_closed);

    let cert = PathBuf::from("/etc/tls/cert.pem");
    let key = PathBuf::from("/etc/tls/key.pem");
    assert_eq!(
        cfg.tls_material(),
        TlsMaterial::Ready {
            cert_path: &cert,
            key_path: &key,
            ca_path: None
        }
    );
}

#[test]
fn test_strict_tls_only_disabled_by_literal_false() {
    assert!(load(&[("PROXY_REJECT_UNAUTHORIZED", "0")]).unwrap().strict_tls);
    assert!(load(&[("PROXY_REJECT_UNAUTHORIZED", "true")]).unwrap().strict_tls);
}

#[test]
fn test_https_port_without_material_is_incomplete() {
    let cfg = load(&[("HTTPS_PORT", "8443"), ("HTTPS_CERT_PATH", "/tmp/cert.pem")]).unwrap();
    assert_eq!(cfg.tls_material(), TlsMaterial::Incomplete);
}

#[test]
fn test_invalid_port_is_an_error() {
    let err = load(&[("HTTP_PORT", "eighty")]).unwrap_err();
    assert!(err.to_string().contains("HTTP_PORT"));
}

#[test]
fn test_upstream_proxy_variables() {
    let cfg = load(&[
        ("HTTP_PROXY", "http://upper:3128"),
        ("http_proxy", "http://lower:3128"),
        ("HTTPS_PROXY", "http://secure:3128"),
        ("NO_PROXY", "internal.example"),
    ])
    .unwrap();

    assert_eq!(cfg.upstream.http_proxy.as_deref(), Some("http://lower:3128"));
    assert_eq!(cfg.upstream.https_proxy.as_deref(), Some("http://secure:3128"));
    assert_eq!(cfg.upstream.no_proxy.as_deref(), Some("internal.example"));
}

#[test]
fn test_yaml_file_with_env_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "listen_host: 127.0.0.1\nhttp_port: 9000\nstrict_tls: false\nhttps:\n  ca_path: /etc/tls/ca.pem\nupstream:\n  no_proxy: \"*\""
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let cfg = load(&[(CONFIG_FILE_ENV, path.as_str()), ("HTTP_PORT", "9100")]).unwrap();

    assert_eq!(cfg.listen_host, "127.0.0.1");
    assert_eq!(cfg.http_port, 9100);
    assert!(!cfg.strict_tls);
    assert_eq!(cfg.https.ca_path, Some(PathBuf::from("/etc/tls/ca.pem")));
    assert_eq!(cfg.upstream.no_proxy.as_deref(), Some("*"));
}

#[test]
fn test_missing_yaml_file_is_an_error() {
    assert!(load(&[(CONFIG_FILE_ENV, "/nonexistent/host-forward.yaml")]).is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = load(&[("HTTP_PORT", "8000")]).unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1, cfg2);
}
