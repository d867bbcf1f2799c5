//! Configuration system for ferry.
//!
//! Provides TOML-based configuration with:
//! - Named SQL Server profiles (`[server.prod]`, `[server.qa]`, ...)
//! - Sync defaults (`[sync]`)
//! - Config file layering (user config dir + project-local `ferry.toml`)
//! - Password resolution (env var → default env var → config file)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, log_dir, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{
    ResolvedSecret, SecretSource, default_password_env, resolve_password, resolve_password_with,
};
pub use types::*;
