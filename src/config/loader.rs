//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GatehouseConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatehouseConfig, ConfigError> {
    let config: GatehouseConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatehouseConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthenticatorConfig, RememberMeStrategy};
    use std::io::Write;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[[firewalls]]
name = "main"
pattern = "/*"

[[firewalls.authenticators]]
type = "form_login"
login_path = "/login"
check_path = "/login"

[[firewalls.authenticators]]
type = "http_basic"
realm = "Gatehouse"

[firewalls.remember_me]
strategy = "persistent"
lifetime_secs = 604800

[firewalls.login_throttling]
max_attempts = 3

[firewalls.logout]
path = "/logout"

[[access_control]]
path = "/admin/*"
attributes = ["ROLE_ADMIN"]
requires_channel = "https"

[[access_control]]
path = "/*"
attributes = ["PUBLIC_ACCESS"]

[[users]]
identifier = "alice"
password = "wonderland"
roles = ["ROLE_USER"]
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.firewalls.len(), 1);
        let main = &config.firewalls[0];
        assert!(matches!(main.authenticators[0], AuthenticatorConfig::FormLogin(_)));
        assert!(matches!(main.authenticators[1], AuthenticatorConfig::HttpBasic(_)));
        let remember_me = main.remember_me.as_ref().unwrap();
        assert_eq!(remember_me.strategy, RememberMeStrategy::Persistent);
        assert_eq!(remember_me.name, "REMEMBERME");
        assert_eq!(main.login_throttling.as_ref().unwrap().effective_global_max_attempts(), 15);
        assert_eq!(config.access_control.len(), 2);
        assert_eq!(config.users[0].roles, vec!["ROLE_USER".to_string()]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/gatehouse.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse_config("firewalls = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_error() {
        let err = parse_config("[timeouts]\nrequest_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeouts.request_secs"));
    }
}
