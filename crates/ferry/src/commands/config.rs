//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};

use ferry_config::{FerryConfig, ServerConfig};

use super::{Context, print_json};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration and all server profiles
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with a commented template
    Init {
        /// Create project-local config (./ferry.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Add or replace a server profile in the user config
    AddServer {
        /// Profile name
        name: String,

        /// Host name or address
        #[arg(long)]
        host: String,

        /// SQL login
        #[arg(long)]
        user: String,

        /// Env var holding the password
        #[arg(long)]
        password_env: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Catalog database
        #[arg(long)]
        database: Option<String>,

        /// Accept the server certificate without validation
        #[arg(long)]
        trust_cert: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::AddServer {
            name,
            host,
            user,
            password_env,
            port,
            database,
            trust_cert,
        } => {
            let mut server = ServerConfig {
                user: Some(user),
                password_env,
                trust_cert,
                ..ServerConfig::for_host(host)
            };
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(database) = database {
                server.database = database;
            }
            cmd_add_server(ctx, name, server)
        }
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;

    if ctx.json_output {
        return print_json(&redacted(&config));
    }

    println!("# Ferry Configuration\n");

    if config.server.is_empty() {
        println!("No server profiles configured\n");
    } else {
        println!("Servers:");
        for (name, server) in &config.server {
            let password = match (&server.password_env, server.has_plaintext_password()) {
                (Some(var), _) => format!("password from {}", var),
                (None, true) => "password inline (plaintext)".to_string(),
                (None, false) => format!(
                    "password from {}",
                    ferry_config::default_password_env(name)
                ),
            };
            println!(
                "  {:<12} {}:{}/{}  user={}  {}",
                name,
                server.host,
                server.port,
                server.database,
                server.user.as_deref().unwrap_or("-"),
                password
            );
        }
        println!();
    }

    let sync = config.sync();
    println!("Sync:");
    println!("  parallelism: {}", sync.parallelism);
    println!("  resume: {}", sync.resume);
    println!("  mask_sensitive: {}", sync.mask_sensitive);
    println!();

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", redacted(&config).to_toml()?);
    }

    Ok(())
}

/// Copy of `config` with inline passwords blanked.
fn redacted(config: &FerryConfig) -> FerryConfig {
    let mut config = config.clone();
    for server in config.server.values_mut() {
        if server.password.is_some() {
            server.password = Some("********".to_string());
        }
    }
    config
}

fn cmd_which() -> Result<()> {
    let loaded = ferry_config::load_config(None)?;

    println!("Config file search order (later overrides earlier):\n");

    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'ferry config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }
    for warning in &loaded.warnings {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}

fn user_config_file() -> Result<PathBuf> {
    ferry_config::user_config_path().ok_or_else(|| anyhow!("Could not determine config directory"))
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("ferry.toml")
    } else {
        user_config_file()?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let template = r#"# Ferry Configuration

# Server profiles, referenced by name in --source / --target.
# The password is read from password_env, then FERRY_<NAME>_PASSWORD.
# [server.prod]
# host = "sql-prod-01"
# port = 1433
# database = "SSISDB"
# user = "ferry"
# password_env = "FERRY_PROD_PASSWORD"
# trust_cert = false
# connect_timeout_secs = 15
# query_timeout_secs = 120

[sync]
parallelism = 1
resume = false
mask_sensitive = false
"#;
    std::fs::write(&path, template)?;
    println!("✓ Created {}", path.display());
    Ok(())
}

fn cmd_add_server(ctx: &Context, name: String, server: ServerConfig) -> Result<()> {
    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => user_config_file()?,
    };
    let mut config = if path.is_file() {
        ferry_config::load_config_file(&path)?
    } else {
        FerryConfig::new()
    };
    config.server.insert(name.clone(), server);
    ferry_config::save_config(&config, &path)?;
    println!("✓ Saved [server.{}] to {}", name, path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    let path = user_config_file()?;
    println!("{}", path.display());
    Ok(())
}
