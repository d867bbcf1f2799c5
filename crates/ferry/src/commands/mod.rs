//! CLI command handlers.

pub mod check;
pub mod config;
pub mod export;
pub mod overrides;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use console::style;
use serde::Serialize;
use tracing::{debug, warn};

use ferry_catalog::{Credentials, MssqlGateway, SharedGateway};
use ferry_config::FerryConfig;
use ferry_sync::{ItemResult, Outcome, Warning};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
}

impl Context {
    /// Load the config file given with `--config`, or discover the layered config.
    pub fn load_config(&self) -> Result<FerryConfig> {
        if let Some(path) = &self.config_path {
            return ferry_config::load_config_file(path)
                .with_context(|| format!("loading {}", path.display()));
        }
        let loaded = ferry_config::load_config(None)?;
        for warning in &loaded.warnings {
            warn!("{}", warning);
        }
        Ok(loaded.config)
    }
}

/// Build a gateway for the named server profile.
///
/// No connection is opened here; the first catalog read does that.
pub fn connect(config: &FerryConfig, name: &str) -> Result<SharedGateway> {
    let server = config.server(name)?;
    let host = server.require_host(name)?;
    let user = server.user.as_deref().with_context(|| {
        format!("no user configured for [server.{}]", name)
    })?;
    let secret = ferry_config::resolve_password(name, server)?;
    debug!(server = name, source = %secret.source, "resolved password");

    let gateway = MssqlGateway::builder(host)
        .port(server.port)
        .database(server.database.clone())
        .credentials(Credentials::new(user, secret.value.as_str()))
        .trust_cert(server.trust_cert)
        .connect_timeout(Duration::from_secs(server.connect_timeout_secs))
        .query_timeout(Duration::from_secs(server.query_timeout_secs))
        .build()?;
    Ok(Arc::new(gateway))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_warning(warning: &Warning) {
    eprintln!("{} {}", style("⚠").yellow(), warning);
}

/// One line per item result.
pub fn print_item(item: &ItemResult) {
    let marker = match item.outcome {
        Outcome::Applied | Outcome::Rendered => style("✓").green(),
        Outcome::Skipped(_) => style("·").dim(),
        Outcome::Failed(_) => style("✗").red(),
    };
    println!("  {} {}", marker, item);
}
