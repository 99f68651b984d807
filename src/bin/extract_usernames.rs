use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use dm_outreach::logging;
use dm_outreach::worklist;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Write a username-only copy (usernames_<file>) of every category CSV"
)]
struct Args {
    /// Directory holding the category exports
    #[arg(long, default_value = "category")]
    dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(logging::env_filter_with("info", &["extract_usernames"]))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let written = worklist::extract_usernames(&args.dir)?;
    for path in &written {
        println!("Processed -> {}", path.display());
    }
    info!(files = written.len(), "username extraction finished");
    Ok(())
}
