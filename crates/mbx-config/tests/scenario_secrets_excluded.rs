//! Literal secrets in config are refused; env var names are fine.

use mbx_config::load_layered_yaml_from_strings;

#[test]
fn literal_token_is_rejected_without_echoing_it() {
    let yaml = r#"
instances:
  - id: maverick
    base_url: "https://send.example.com/api"
    api_key_env: "sk-live-0123456789abcdef"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err().to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "{err}");
    assert!(err.contains("/instances/0/api_key_env"), "{err}");
    assert!(!err.contains("0123456789abcdef"), "secret leaked: {err}");
}

#[test]
fn pasted_bearer_header_is_rejected() {
    let yaml = r#"
instances:
  - id: longrun
    base_url: "https://send.example.com/api"
    api_key_env: "Bearer 12|abcdefghijklmnop"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err().to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "{err}");
}

#[test]
fn overlay_cannot_smuggle_a_secret() {
    let base = r#"
instances:
  - id: maverick
    base_url: "https://send.example.com/api"
    api_key_env: "MAVERICK_API_KEY"
"#;
    let overlay = r#"
extra:
  token: "ghp_abcdefghijklmnopqrstuvwxyz"
"#;
    assert!(load_layered_yaml_from_strings(&[base, overlay]).is_err());
}

#[test]
fn env_var_names_are_accepted() {
    let yaml = r#"
instances:
  - id: maverick
    base_url: "https://send.example.com/api"
    api_key_env: "MAVERICK_API_KEY"
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    assert!(loaded.canonical_json.contains("MAVERICK_API_KEY"));
}
