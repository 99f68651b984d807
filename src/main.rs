use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use dm_outreach::config::{self, Config};
use dm_outreach::logging::{self, LoggingSettings};
use dm_outreach::model::{UserRow, TIMESTAMP_FORMAT};
use dm_outreach::output;
use dm_outreach::platform::{DirectMessenger, HttpPlatformClient};
use dm_outreach::send_log::{self, SendLog, SendStats};
use dm_outreach::sender::{DmSender, SendMode, UserOutcome};
use dm_outreach::templates::TemplateBook;
use dm_outreach::worklist::{self, CategorySource};

#[derive(Debug, Parser)]
#[command(author, version, about = "Send templated direct messages to category worklists")]
struct Args {
    /// Path to YAML config file (optional; defaults and environment apply if absent)
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge category CSV files into a single worklist
    ProcessCategories {
        /// Worklist to write (default: app.users_file)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Category source as NAME=PATH; repeatable, replaces the configured list
        #[arg(long = "category", value_name = "NAME=PATH")]
        categories: Vec<CategorySource>,
    },

    /// Message every pending user in the worklist
    SendMessages {
        /// Worklist CSV (default: app.users_file)
        #[arg(long)]
        users_file: Option<PathBuf>,

        /// Templates JSON (default: app.templates_file)
        #[arg(long)]
        templates_file: Option<PathBuf>,

        /// Use this template name instead of a random one per user
        #[arg(long)]
        template: Option<String>,

        /// Print the resolved messages instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show sending statistics from the send log and worklist
    ShowStats {
        /// Worklist CSV (default: app.users_file)
        #[arg(long)]
        users_file: Option<PathBuf>,
    },

    /// Check that the platform accepts our credentials or saved session
    TestConnection,

    /// Delete the application log and the send log
    ClearLogs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let _guard = logging::init(&LoggingSettings {
        level: cfg.app.log_level.clone(),
        logs_dir: cfg.app.logs_dir(),
    })?;
    info!(config = %args.config.display(), "logger initialized");

    match args.command {
        Command::ProcessCategories { output, categories } => {
            process_categories(&cfg, output, categories)
        }
        Command::SendMessages {
            users_file,
            templates_file,
            template,
            dry_run,
        } => send_messages(&cfg, users_file, templates_file, template, dry_run).await,
        Command::ShowStats { users_file } => show_stats(&cfg, users_file),
        Command::TestConnection => test_connection(&cfg).await,
        Command::ClearLogs => clear_logs(&cfg),
    }
}

fn process_categories(
    cfg: &Config,
    output: Option<PathBuf>,
    categories: Vec<CategorySource>,
) -> Result<()> {
    let sources = if categories.is_empty() {
        cfg.categories.clone()
    } else {
        categories
    };
    if sources.is_empty() {
        bail!("no category sources configured; add `categories` to the config or pass --category NAME=PATH");
    }
    let output = output.unwrap_or_else(|| cfg.app.users_file());

    let summary = worklist::build_worklist(&sources, &output)
        .with_context(|| format!("failed to build worklist {}", output.display()))?;

    let rows: Vec<Vec<String>> = summary
        .per_category
        .iter()
        .map(|(cat, n)| vec![cat.clone(), n.to_string()])
        .collect();
    output::print_table(&["category", "users"], &rows);
    for skipped in &summary.skipped_sources {
        println!("skipped: {}", skipped.display());
    }
    if summary.skipped_rows > 0 {
        println!("{} malformed rows skipped", summary.skipped_rows);
    }
    println!(
        "Successfully processed category files to {} ({} users)",
        output.display(),
        summary.rows
    );
    Ok(())
}

async fn send_messages(
    cfg: &Config,
    users_file: Option<PathBuf>,
    templates_file: Option<PathBuf>,
    template: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let users_file = users_file.unwrap_or_else(|| cfg.app.users_file());
    let templates_file = templates_file.unwrap_or_else(|| cfg.app.templates_file());

    let templates = TemplateBook::load(&templates_file)
        .with_context(|| format!("failed to load templates {}", templates_file.display()))?;
    let users = worklist::load_pending(&users_file);
    if users.is_empty() {
        bail!("no pending users found in {}", users_file.display());
    }

    let client: Arc<dyn DirectMessenger> = Arc::new(HttpPlatformClient::from_config(cfg)?);
    let mut sender = DmSender::new(
        client,
        templates,
        SendLog::new(cfg.app.send_log_file()),
        cfg.app.delay_range(),
    )
    .with_status_updates(&users_file);
    if let Some(name) = template {
        sender = sender.with_template(name);
    }

    let mode = if dry_run {
        println!("Running in dry-run mode - no messages will be sent");
        SendMode::DryRun
    } else {
        SendMode::Live
    };
    println!("Found {} users to process", users.len());

    let total = users.len();
    let report = sender
        .run_with(&users, mode, |idx, user, outcome| {
            print_outcome(idx + 1, total, user, outcome)
        })
        .await
        .map_err(|err| {
            error!(%err, "send run aborted");
            err
        })?;

    if dry_run {
        println!(
            "Dry run complete: {} previewed, {} skipped",
            report.previews.len(),
            report.skipped
        );
    } else {
        println!(
            "Done: {} sent, {} failed, {} skipped",
            report.sent, report.failed, report.skipped
        );
    }
    Ok(())
}

fn print_outcome(n: usize, total: usize, user: &UserRow, outcome: &UserOutcome) {
    let status = match outcome {
        UserOutcome::Sent => "Success".to_string(),
        UserOutcome::Failed(reason) => format!("Failed ({})", reason),
        UserOutcome::Skipped(reason) => format!("Skipped ({})", reason),
        UserOutcome::Previewed(preview) => {
            println!("\nProcessing {} ({}):", preview.username, preview.category);
            for (i, msg) in preview.messages.iter().enumerate() {
                println!("Message {} [{}]:", i + 1, msg.template);
                println!("{}", msg.text);
            }
            println!("---");
            "Dry run".to_string()
        }
    };
    println!("[{}/{}] Processing {}: {}", n, total, user.username, status);
}

fn show_stats(cfg: &Config, users_file: Option<PathBuf>) -> Result<()> {
    let log_file = cfg.app.send_log_file();
    let users_file = users_file.unwrap_or_else(|| cfg.app.users_file());
    if !log_file.exists() && !users_file.exists() {
        println!("No statistics available yet");
        return Ok(());
    }

    let records = send_log::read_records(&log_file)?;
    let stats = SendStats::from_records(&records, Local::now().date_naive());
    println!("Send log: {}", log_file.display());
    println!(
        "  attempts: {}  success: {}  failed: {}  today: {}",
        stats.total, stats.success, stats.failed, stats.sent_today
    );
    if let Some(last) = stats.last_attempt {
        println!("  last attempt: {}", last.format(TIMESTAMP_FORMAT));
    }
    if !stats.per_category.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = stats
            .per_category
            .iter()
            .map(|(cat, s)| vec![cat.clone(), s.success.to_string(), s.failed.to_string()])
            .collect();
        output::print_table(&["category", "success", "failed"], &rows);
    }

    if users_file.exists() {
        match worklist::status_counts(&users_file) {
            Ok(counts) => {
                println!("\nWorklist: {}", users_file.display());
                let rows: Vec<Vec<String>> = counts
                    .iter()
                    .map(|(status, n)| vec![status.clone(), n.to_string()])
                    .collect();
                output::print_table(&["status", "users"], &rows);
            }
            Err(err) => error!(%err, "failed to read worklist statuses"),
        }
    }
    Ok(())
}

async fn test_connection(cfg: &Config) -> Result<()> {
    let client = HttpPlatformClient::from_config(cfg)?;
    if client.login().await.context("connection test failed")? {
        println!("Successfully connected to the platform");
        Ok(())
    } else {
        bail!("failed to connect to the platform")
    }
}

fn clear_logs(cfg: &Config) -> Result<()> {
    let logs_dir = cfg.app.logs_dir();
    let mut files = logging::app_log_files(&logs_dir)?;
    files.push(cfg.app.send_log_file());
    for file in files {
        if file.exists() {
            fs::remove_file(&file).with_context(|| format!("failed to remove {}", file.display()))?;
            println!("Cleared {}", file.display());
        } else {
            println!("{} does not exist", file.display());
        }
    }
    Ok(())
}
