//! Check command - report what a sync would find, without writing.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};

use ferry_sync::SyncEngine;

use super::{Context, connect, print_json};

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
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
}

/// Run the check command.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = SyncEngine::new(
        connect(&config, &args.source)?,
        connect(&config, &args.target)?,
    );
    let report = engine
        .check(&args.folder, args.target_folder.as_deref())
        .await?;

    if ctx.json_output {
        print_json(&report)?;
    } else {
        let green = Style::new().green();
        let red = Style::new().red();
        let dim = Style::new().dim();
        let mark = |ok: bool| {
            if ok {
                green.apply_to("● found")
            } else {
                red.apply_to("● missing")
            }
        };

        println!();
        println!("{}", style("Catalog Check").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!();
        println!(
            "  {} {} {} {}",
            dim.apply_to("Source:"),
            report.source,
            report.source_folder,
            mark(report.source_folder_exists)
        );
        println!(
            "  {} {} {} {}",
            dim.apply_to("Target:"),
            report.target,
            report.target_folder,
            mark(report.target_folder_exists)
        );
        println!();
        for env in &report.environments {
            let note = if report.existing_environments.contains(env) {
                " (already on target)"
            } else {
                ""
            };
            println!("  {} {}{}", dim.apply_to("Environment:"), env, note);
        }
        for project in &report.missing_projects {
            println!(
                "  {} {} not deployed on target",
                red.apply_to("Project:"),
                project
            );
        }
        println!();
    }

    if !report.is_ready() {
        bail!("folder missing on source or target");
    }
    Ok(())
}
