//! Overrides command - copy literal parameter overrides of one project.

use anyhow::{Result, bail};
use clap::Args;
use console::style;

use ferry_sync::{OverrideOptions, SyncEngine};

use super::{Context, connect, print_item, print_json, print_warning};

/// Arguments for the overrides command.
#[derive(Args, Debug)]
pub struct OverridesArgs {
    /// Source server profile
    #[arg(long)]
    pub source: String,

    /// Target server profile
    #[arg(long)]
    pub target: String,

    /// Catalog folder
    #[arg(long)]
    pub folder: String,

    /// Target folder (defaults to the source folder name)
    #[arg(long)]
    pub target_folder: Option<String>,

    /// Project whose overrides are copied
    #[arg(long)]
    pub project: String,

    /// Print the statements instead of executing them
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the overrides command.
pub async fn run(args: OverridesArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = SyncEngine::new(
        connect(&config, &args.source)?,
        connect(&config, &args.target)?,
    );
    let report = engine
        .copy_overrides(&OverrideOptions {
            folder: args.folder,
            target_folder: args.target_folder,
            project: args.project,
            dry_run: args.dry_run,
        })
        .await?;

    if ctx.json_output {
        print_json(&report)?;
    } else if args.dry_run {
        for statement in report.items.iter().filter_map(|i| i.statement.as_deref()) {
            println!("{}", statement);
        }
        for warning in &report.warnings {
            print_warning(warning);
        }
    } else {
        println!();
        println!("{} {}", style("Overrides").bold(), report.project);
        for item in &report.items {
            print_item(item);
        }
        for warning in &report.warnings {
            print_warning(warning);
        }
        println!();
    }

    if report.has_failures() {
        bail!("override copy finished with failures");
    }
    Ok(())
}
