//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server.prod]            # named SQL Server profiles
//! [server.qa]
//! [sync]                   # defaults for sync runs
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;
/// Default catalog database.
pub const DEFAULT_DATABASE: &str = "SSISDB";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    /// Named server profiles (`[server.prod]`, `[server.qa]`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub server: BTreeMap<String, ServerConfig>,

    /// Sync defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

impl FerryConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Server profiles are replaced whole, not field by field.
    pub fn merge(&mut self, other: FerryConfig) {
        for (name, server) in other.server {
            self.server.insert(name, server);
        }

        if other.sync.is_some() {
            self.sync = other.sync;
        }
    }

    /// Look up a server profile by name.
    pub fn server(&self, name: &str) -> crate::Result<&ServerConfig> {
        self.server
            .get(name)
            .ok_or_else(|| crate::ConfigError::ServerNotFound(name.to_string()))
    }

    /// Names of all configured server profiles, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.server.keys().cloned().collect()
    }

    /// Sync defaults, or the built-in defaults when no `[sync]` section exists.
    pub fn sync(&self) -> SyncConfig {
        self.sync.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One SQL Server hosting a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address.
    pub host: String,
    pub port: u16,
    /// Catalog database.
    pub database: String,
    /// SQL login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Env var holding the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Plaintext password (not recommended).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Accept the server certificate without validation.
    pub trust_cert: bool,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: None,
            password_env: None,
            password: None,
            trust_cert: false,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Profile for `host` with defaults everywhere else.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Whether a password is stored inline in the config file.
    pub fn has_plaintext_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Host, or an error naming the profile when it is empty.
    pub fn require_host(&self, name: &str) -> crate::Result<&str> {
        if self.host.is_empty() {
            return Err(crate::ConfigError::MissingField {
                field: "host".to_string(),
                context: format!("[server.{}]", name),
            });
        }
        Ok(&self.host)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Defaults applied to `ferry sync` unless overridden on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Environments applied concurrently.
    pub parallelism: usize,
    /// Skip objects already present on the target.
    pub resume: bool,
    /// Redact sensitive values in dry-run output.
    pub mask_sensitive: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            resume: false,
            mask_sensitive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = FerryConfig::from_toml(
            r#"
[server.prod]
host = "sql-prod-01"
port = 14330
database = "SSISDB"
user = "ferry"
password_env = "PROD_PW"
trust_cert = true
connect_timeout_secs = 5
query_timeout_secs = 60

[server.qa]
host = "sql-qa-01"

[sync]
parallelism = 4
mask_sensitive = true
"#,
        )
        .unwrap();

        let prod = config.server("prod").unwrap();
        assert_eq!(prod.host, "sql-prod-01");
        assert_eq!(prod.port, 14330);
        assert_eq!(prod.user.as_deref(), Some("ferry"));
        assert_eq!(prod.password_env.as_deref(), Some("PROD_PW"));
        assert!(prod.trust_cert);
        assert_eq!(prod.connect_timeout_secs, 5);

        let qa = config.server("qa").unwrap();
        assert_eq!(qa.port, DEFAULT_PORT);
        assert_eq!(qa.database, DEFAULT_DATABASE);
        assert_eq!(qa.query_timeout_secs, DEFAULT_QUERY_TIMEOUT_SECS);
        assert!(!qa.trust_cert);

        let sync = config.sync();
        assert_eq!(sync.parallelism, 4);
        assert!(!sync.resume);
        assert!(sync.mask_sensitive);
        assert_eq!(config.server_names(), vec!["prod", "qa"]);
    }

    #[test]
    fn test_empty_config() {
        let config = FerryConfig::from_toml("").unwrap();
        assert!(config.server.is_empty());
        assert_eq!(config.sync(), SyncConfig::default());
        assert!(matches!(
            config.server("prod"),
            Err(crate::ConfigError::ServerNotFound(name)) if name == "prod"
        ));
    }

    #[test]
    fn test_merge_overrides_profiles() {
        let mut base = FerryConfig::from_toml(
            r#"
[server.prod]
host = "old"
user = "a"

[server.qa]
host = "qa"

[sync]
parallelism = 2
"#,
        )
        .unwrap();
        let local = FerryConfig::from_toml(
            r#"
[server.prod]
host = "new"
"#,
        )
        .unwrap();
        base.merge(local);

        let prod = base.server("prod").unwrap();
        assert_eq!(prod.host, "new");
        assert_eq!(prod.user, None);
        assert!(base.server.contains_key("qa"));
        assert_eq!(base.sync().parallelism, 2);
    }

    #[test]
    fn test_toml_roundtrip_omits_empty_fields() {
        let mut config = FerryConfig::new();
        config
            .server
            .insert("prod".to_string(), ServerConfig::for_host("sql-prod-01"));
        let text = config.to_toml().unwrap();
        assert!(text.contains("[server.prod]"));
        assert!(!text.contains("password"));
        assert_eq!(FerryConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_require_host() {
        let empty = ServerConfig::default();
        let err = empty.require_host("prod").unwrap_err();
        assert!(err.to_string().contains("[server.prod]"));
        assert_eq!(
            ServerConfig::for_host("h").require_host("prod").unwrap(),
            "h"
        );
    }
}
