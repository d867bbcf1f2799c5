//! Sync command - replicate environments from one catalog to another.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};

use ferry_sync::{SyncEngine, SyncOptions, SyncReport};

use super::{Context, connect, print_item, print_json, print_warning};

/// Arguments for the sync command.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source server profile
    #[arg(long)]
    pub source: String,

    /// Target server profile
    #[arg(long)]
    pub target: String,

    /// Catalog folder to replicate
    #[arg(long)]
    pub folder: String,

    /// Target folder (defaults to the source folder name)
    #[arg(long)]
    pub target_folder: Option<String>,

    /// Only replicate this environment (repeatable)
    #[arg(short, long = "environment")]
    pub environments: Vec<String>,

    /// Print the statements instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip environments, variables and references already on the target
    #[arg(long)]
    pub resume: bool,

    /// Environments applied concurrently
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Redact sensitive values in dry-run output
    #[arg(long)]
    pub mask_sensitive: bool,
}

impl SyncArgs {
    /// Command-line flags over `[sync]` config defaults.
    pub fn options(&self, defaults: &ferry_config::SyncConfig) -> SyncOptions {
        SyncOptions {
            target_folder: self.target_folder.clone(),
            environments: self.environments.clone(),
            dry_run: self.dry_run,
            resume: self.resume || defaults.resume,
            mask_sensitive: self.mask_sensitive || defaults.mask_sensitive,
            parallelism: self.parallelism.unwrap_or(defaults.parallelism).max(1),
            ..SyncOptions::new(self.folder.clone())
        }
    }
}

/// Run the sync command.
pub async fn run(args: SyncArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let options = args.options(&config.sync());
    let engine = SyncEngine::new(
        connect(&config, &args.source)?,
        connect(&config, &args.target)?,
    );

    let report = engine.run(&options).await?;

    if ctx.json_output {
        print_json(&report)?;
    } else if report.dry_run {
        print!("{}", report.script());
        for warning in report.warnings() {
            print_warning(warning);
        }
    } else {
        print_report(&report, ctx.verbose);
    }

    if report.has_failures() {
        bail!("sync finished with failures");
    }
    Ok(())
}

fn print_report(report: &SyncReport, verbose: bool) {
    let dim = Style::new().dim();

    println!();
    println!(
        "{} {} → {}",
        style("Sync").bold(),
        report.source,
        report.target
    );
    println!("{}", dim.apply_to("─".repeat(40)));

    for env in &report.environments {
        println!();
        let state = if env.state.is_failed() {
            style(env.state.to_string()).red()
        } else {
            style(env.state.to_string()).green()
        };
        println!("  {} {}", style(&env.environment).bold(), state);
        for item in &env.items {
            print_item(item);
        }
        for warning in &env.warnings {
            print_warning(warning);
        }
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in &report.warnings {
            print_warning(warning);
        }
    }

    let totals = report.totals();
    println!();
    println!(
        "  {} {} created, {} linked, {} skipped, {} errored",
        dim.apply_to("Total:"),
        totals.created,
        totals.linked,
        totals.skipped,
        totals.errored
    );
    if verbose {
        println!("  {} {}", dim.apply_to("Run:"), report.run_id);
    }
    println!();
}
