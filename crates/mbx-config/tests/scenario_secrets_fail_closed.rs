//! Secret resolution fails closed and never prints values.
//!
//! Uses an injected lookup so no test mutates the process environment.

use mbx_config::load_layered_yaml_from_strings;
use mbx_config::secrets::{resolve_secrets, resolve_secrets_with};
use mbx_config::AppConfig;

const YAML: &str = r#"
instances:
  - id: maverick
    base_url: "https://send.example.com/api"
    api_key_env: "MBX_TEST_MAVERICK_KEY"
  - id: longrun
    base_url: "https://send.longrun.example/api"
    api_key_env: "MBX_TEST_LONGRUN_KEY"
"#;

fn cfg() -> AppConfig {
    load_layered_yaml_from_strings(&[YAML])
        .expect("test yaml must parse cleanly")
        .app_config()
        .expect("test yaml must validate")
}

#[test]
fn all_keys_present_resolves_every_instance() {
    let s = resolve_secrets_with(&cfg(), |name| Some(format!("value-of-{name}"))).unwrap();
    assert_eq!(s.len(), 2);
    assert_eq!(s.api_key("maverick"), Some("value-of-MBX_TEST_MAVERICK_KEY"));
    assert_eq!(s.api_key("longrun"), Some("value-of-MBX_TEST_LONGRUN_KEY"));
    assert_eq!(s.api_key("unknown"), None);
}

#[test]
fn missing_key_names_the_variable() {
    let err = resolve_secrets_with(&cfg(), |name| {
        (name == "MBX_TEST_MAVERICK_KEY").then(|| "present".to_string())
    })
    .unwrap_err()
    .to_string();
    assert!(err.contains("SECRETS_MISSING"), "{err}");
    assert!(err.contains("MBX_TEST_LONGRUN_KEY"), "{err}");
    assert!(err.contains("longrun"), "{err}");
}

#[test]
fn blank_key_counts_as_missing() {
    let err = resolve_secrets_with(&cfg(), |_| Some("   ".to_string()))
        .unwrap_err()
        .to_string();
    assert!(err.contains("MBX_TEST_MAVERICK_KEY"), "{err}");
}

#[test]
fn process_env_without_sentinels_fails_closed() {
    // These sentinel names are never set in any environment.
    assert!(resolve_secrets(&cfg()).is_err());
}

#[test]
fn debug_output_is_redacted() {
    let s = resolve_secrets_with(&cfg(), |_| Some("super-secret-value".to_string())).unwrap();
    let dbg = format!("{s:?}");
    assert!(dbg.contains("maverick"));
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("super-secret-value"), "{dbg}");
}
