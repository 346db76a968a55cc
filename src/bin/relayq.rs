//! relayq CLI — operator interface to the durable request history.

use clap::{Parser, Subcommand};
use relayq::config::Config;
use relayq::history::{self, PersistedEntry};
use relayq::model::Status;
use relayq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "relayq", about = "Serialized request queue for outbound API calls")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or manage the durable request history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List history entries, most recent first
    List {
        /// Filter by status (pending/running/completed/failed/cancelled)
        #[arg(long)]
        status: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one entry in detail
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// Remove completed entries (keeps failed and cancelled)
    Prune,
    /// Drop all history entries
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "relayq".to_string(),
    })?;

    match cli.command {
        Command::History { action } => match action {
            HistoryAction::List { status, limit } => cmd_history_list(&config, status, limit).await,
            HistoryAction::Show { id } => cmd_history_show(&config, id).await,
            HistoryAction::Prune => cmd_history_prune(&config).await,
            HistoryAction::Clear => cmd_history_clear(&config).await,
        },
    }
}

async fn cmd_history_list(
    config: &Config,
    status: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(parse_status(&s)?),
        None => None,
    };

    let entries = history::load_history_file(&config.history_path).await;
    let shown: Vec<&PersistedEntry> = entries
        .iter()
        .filter(|e| status_filter.is_none_or(|s| e.status == s))
        .take(limit)
        .collect();

    if shown.is_empty() {
        println!("No history entries found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<8}  {:<10}  {:<8}  {:<12}  {:<30}  COMPLETED",
        "ID", "STATUS", "PRI", "CATEGORY", "ACTION"
    );
    println!("{}", "-".repeat(100));

    for entry in &shown {
        let action = if entry.action.len() > 30 {
            &entry.action[..30]
        } else {
            &entry.action
        };
        println!(
            "{:<8}  {:<10}  {:<8}  {:<12}  {:<30}  {}",
            entry.id.to_string(),
            entry.status.to_string(),
            entry.priority.to_string(),
            entry.category,
            action,
            entry
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    println!("\n{} entry(ies)", shown.len());
    Ok(())
}

async fn cmd_history_show(config: &Config, id_str: String) -> anyhow::Result<()> {
    let entries = history::load_history_file(&config.history_path).await;

    // Prefix matching — find the entry whose ID starts with the given string
    let matches: Vec<&PersistedEntry> = entries
        .iter()
        .filter(|e| e.id.0.to_string().starts_with(&id_str))
        .collect();
    let entry = match matches.len() {
        0 => anyhow::bail!("no history entry matching prefix '{id_str}'"),
        1 => matches[0],
        n => anyhow::bail!("{n} history entries match prefix '{id_str}' — be more specific"),
    };

    println!("ID:         {}", entry.id.0);
    println!("Status:     {}", entry.status);
    println!("Priority:   {}", entry.priority);
    println!("Category:   {}", entry.category);
    println!("Action:     {}", entry.action);
    println!("Operation:  {}", entry.request_info.operation);
    println!(
        "Arguments:  {}",
        serde_json::to_string_pretty(&entry.request_info.arguments)?
    );
    println!("Retries:    {}", entry.retry_count);
    println!("Created:    {}", entry.created_at);
    println!(
        "Completed:  {}",
        entry
            .completed_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(ref err) = entry.error {
        println!("Error:      {err}");
    }
    if let Some(ref data) = entry.response_data {
        println!("---");
        println!("Response:   {}", serde_json::to_string_pretty(data)?);
    }

    Ok(())
}

async fn cmd_history_prune(config: &Config) -> anyhow::Result<()> {
    let entries = history::load_history_file(&config.history_path).await;
    let before = entries.len();
    let kept: Vec<PersistedEntry> = entries
        .into_iter()
        .filter(|e| e.status != Status::Completed)
        .collect();
    let removed = before - kept.len();

    history::save_history_file(&config.history_path, &kept).await?;
    println!("Removed {removed} completed entry(ies), kept {}.", kept.len());
    Ok(())
}

async fn cmd_history_clear(config: &Config) -> anyhow::Result<()> {
    history::save_history_file(&config.history_path, &[]).await?;
    println!("History cleared.");
    Ok(())
}

fn parse_status(s: &str) -> anyhow::Result<Status> {
    match s {
        "pending" => Ok(Status::Pending),
        "running" => Ok(Status::Running),
        "completed" => Ok(Status::Completed),
        "failed" => Ok(Status::Failed),
        "cancelled" => Ok(Status::Cancelled),
        other => anyhow::bail!("invalid status: {other}"),
    }
}
