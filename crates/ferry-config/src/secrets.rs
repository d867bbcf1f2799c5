//! Password resolution for server profiles.
//!
//! Resolution order:
//! 1. Env var named by `password_env`
//! 2. Default env var `FERRY_<NAME>_PASSWORD`
//! 3. Inline `password` in the config file (with warning)

use zeroize::Zeroizing;

use crate::{ConfigError, Result, ServerConfig};

/// A resolved password with provenance.
pub struct ResolvedSecret {
    pub value: Zeroizing<String>,
    pub source: SecretSource,
}

impl std::fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// Default password env var for a profile: `FERRY_<NAME>_PASSWORD`.
///
/// Non-alphanumeric characters in the name become underscores.
pub fn default_password_env(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("FERRY_{}_PASSWORD", name)
}

/// Resolve the password of profile `name` from the process environment.
pub fn resolve_password(name: &str, server: &ServerConfig) -> Result<ResolvedSecret> {
    resolve_password_with(name, server, |var| std::env::var(var).ok())
}

/// Resolve the password of profile `name`, reading env vars through `lookup`.
pub fn resolve_password_with(
    name: &str,
    server: &ServerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSecret> {
    let default_env = default_password_env(name);
    let candidates = server
        .password_env
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(default_env.as_str()));

    for var in candidates {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            return Ok(ResolvedSecret {
                value: Zeroizing::new(value),
                source: SecretSource::EnvVar(var.to_string()),
            });
        }
    }

    if let Some(value) = server.password.as_ref().filter(|v| !v.is_empty()) {
        return Ok(ResolvedSecret {
            value: Zeroizing::new(value.clone()),
            source: SecretSource::ConfigFile,
        });
    }

    Err(ConfigError::PasswordNotFound {
        server: name.to_string(),
        env_var: server.password_env.clone().unwrap_or(default_env),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn server(password_env: Option<&str>, password: Option<&str>) -> ServerConfig {
        ServerConfig {
            user: Some("ferry".into()),
            password_env: password_env.map(str::to_string),
            password: password.map(str::to_string),
            ..ServerConfig::for_host("h")
        }
    }

    #[test]
    fn test_default_env_name() {
        assert_eq!(default_password_env("prod"), "FERRY_PROD_PASSWORD");
        assert_eq!(default_password_env("qa-east.2"), "FERRY_QA_EAST_2_PASSWORD");
    }

    #[test]
    fn test_explicit_env_wins() {
        let lookup = env(&[("PROD_PW", "a"), ("FERRY_PROD_PASSWORD", "b")]);
        let secret =
            resolve_password_with("prod", &server(Some("PROD_PW"), Some("c")), lookup).unwrap();
        assert_eq!(secret.value.as_str(), "a");
        assert_eq!(secret.source, SecretSource::EnvVar("PROD_PW".into()));
    }

    #[test]
    fn test_default_env_before_inline() {
        let lookup = env(&[("FERRY_PROD_PASSWORD", "b")]);
        let secret =
            resolve_password_with("prod", &server(Some("PROD_PW"), Some("c")), lookup).unwrap();
        assert_eq!(secret.value.as_str(), "b");
        assert_eq!(
            secret.source,
            SecretSource::EnvVar("FERRY_PROD_PASSWORD".into())
        );
    }

    #[test]
    fn test_inline_fallback_and_empty_values() {
        let lookup = env(&[("FERRY_PROD_PASSWORD", "")]);
        let secret = resolve_password_with("prod", &server(None, Some("c")), lookup).unwrap();
        assert_eq!(secret.value.as_str(), "c");
        assert_eq!(secret.source, SecretSource::ConfigFile);
    }

    #[test]
    fn test_not_found_names_env_var() {
        let err = resolve_password_with("prod", &server(None, None), env(&[])).unwrap_err();
        assert!(err.to_string().contains("FERRY_PROD_PASSWORD"));
    }

    #[test]
    fn test_debug_redacts() {
        let secret = resolve_password_with("prod", &server(None, Some("hunter2")), env(&[])).unwrap();
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert_eq!(
            SecretSource::ConfigFile.to_string(),
            "config file (plaintext)"
        );
    }
}
