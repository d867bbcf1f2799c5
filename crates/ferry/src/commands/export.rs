//! Export command - write deployed projects to .ispac files.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::Style;

use super::{Context, connect, print_json};

/// Arguments for the export command.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Server profile to export from
    #[arg(long)]
    pub source: String,

    /// Catalog folder
    #[arg(long)]
    pub folder: String,

    /// Only export this project
    #[arg(long)]
    pub project: Option<String>,

    /// Output directory
    #[arg(long, short)]
    pub out: PathBuf,
}

/// Run the export command.
pub async fn run(args: ExportArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let gateway = connect(&config, &args.source)?;
    let exported = ferry_sync::export_projects(
        gateway.as_ref(),
        &args.folder,
        args.project.as_deref(),
        &args.out,
    )
    .await?;

    if ctx.json_output {
        print_json(&exported)?;
    } else {
        let dim = Style::new().dim();
        for project in &exported {
            println!(
                "  {} {} {}",
                project.project,
                dim.apply_to("→"),
                project.path.display()
            );
        }
        if exported.is_empty() {
            println!("  {}", dim.apply_to("No projects in folder"));
        }
    }
    Ok(())
}
