//! Convoy CLI - Operator interface for the retention engine
//! Works directly against the SQLite job history; no daemon required

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};

use convoy_core::application::RetentionCleanupService;
use convoy_core::domain::{CleanupResult, CleanupStrategy, Job, JobStatus};
use convoy_core::port::time_provider::SystemTimeProvider;
use convoy_core::port::{JobHistory, NullNotifier};
use convoy_daemon::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use convoy_daemon::DaemonConfig;
use convoy_infra_sqlite::{create_pool, run_migrations, SqliteJobHistory};
use convoy_infra_system::{CronTrigger, SystemProbeImpl, TokioFileStore};

#[derive(Parser)]
#[command(name = "convoy-cli")]
#[command(about = "Convoy retention and history CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file shared with the daemon
    #[arg(long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what a cleanup run would do, without changing anything
    Preview {
        /// Partial retention config (JSON) applied to this preview only
        #[arg(long)]
        set: Option<String>,
    },

    /// Run a cleanup now
    Run {
        /// Report without modifying files or records
        #[arg(long)]
        dry_run: bool,

        /// Partial retention config (JSON) applied to this run only
        #[arg(long)]
        set: Option<String>,
    },

    /// Clean specific jobs regardless of the rules
    Force {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// soft_delete, archive or hard_delete
        #[arg(short, long, default_value = "soft_delete", value_parser = parse_strategy)]
        strategy: CleanupStrategy,
    },

    /// List the job history
    History {
        /// Only jobs in this status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<JobStatus>,

        /// Include soft-deleted records
        #[arg(long)]
        all: bool,
    },

    /// Print the effective retention config
    Config,
}

#[derive(Tabled)]
struct HistoryRow {
    id: String,
    priority: String,
    status: String,
    created: String,
    updated: String,
    size: String,
    reclaimed: String,
}

impl From<&Job> for HistoryRow {
    fn from(job: &Job) -> Self {
        let mut flags = Vec::new();
        if job.deleted {
            flags.push("deleted");
        }
        if job.archived {
            flags.push("archived");
        }
        if job.compressed {
            flags.push("compressed");
        }
        Self {
            id: job.id.clone(),
            priority: job.priority.to_string(),
            status: job.status.to_string(),
            created: format_time(job.created_at),
            updated: format_time(job.updated_at),
            size: format_bytes(job.file_size),
            reclaimed: flags.join(","),
        }
    }
}

#[derive(Tabled)]
struct CountRow {
    key: String,
    jobs: u64,
}

fn parse_strategy(value: &str) -> Result<CleanupStrategy, String> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| format!("unknown strategy '{}'", value))
}

fn parse_status(value: &str) -> Result<JobStatus, String> {
    value.parse::<JobStatus>().map_err(|e| e.to_string())
}

fn parse_overrides(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).context("Invalid JSON in --set"))
        .transpose()
}

fn format_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn print_result(title: &str, result: &CleanupResult) {
    if result.success {
        println!("{}", format!("✓ {}", title).green().bold());
    } else {
        println!("{}", format!("✗ {} failed", title).red().bold());
    }
    if result.dry_run {
        println!("  {}", "(dry run: nothing was changed)".yellow());
    }
    println!();
    println!("  {} {}", "Jobs processed:".bold(), result.jobs_processed);
    println!("  {} {}", "Jobs cleaned:".bold(), result.jobs_cleaned);
    println!(
        "  {} {} cleaned, {} archived, {} compressed",
        "Files:".bold(),
        result.files_cleaned,
        result.files_archived,
        result.files_compressed
    );
    println!("  {} {}", "Space freed:".bold(), format_bytes(result.space_freed));
    if let Some(duration) = result.duration_ms {
        println!("  {} {} ms", "Duration:".bold(), duration);
    }

    let mut counts: Vec<CountRow> = result
        .by_reason
        .iter()
        .map(|(reason, jobs)| CountRow {
            key: reason.to_string(),
            jobs: *jobs,
        })
        .collect();
    counts.extend(result.by_strategy.iter().map(|(strategy, jobs)| CountRow {
        key: strategy.to_string(),
        jobs: *jobs,
    }));
    if !counts.is_empty() {
        println!();
        println!("{}", Table::new(counts));
    }

    if !result.cleaned_job_ids.is_empty() {
        println!();
        println!("  {} {}", "Jobs:".bold(), result.cleaned_job_ids.join(", "));
    }
    for warning in &result.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
    for error in &result.errors {
        let job = error.job_id.as_deref().unwrap_or("run");
        println!("  {} {}: {}", "✗".red(), job, error.message);
    }
}

struct Engine {
    config: DaemonConfig,
    history: Arc<SqliteJobHistory>,
}

impl Engine {
    async fn open(config_path: &str) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(config_path).into_owned());
        let config = DaemonConfig::load_from(&path)?;
        let pool = create_pool(&config.database_url())
            .await
            .context("Failed to open job history")?;
        run_migrations(&pool).await?;
        let history = Arc::new(SqliteJobHistory::new(pool, Arc::new(SystemTimeProvider)));
        Ok(Self { config, history })
    }

    fn cleanup_service(&self) -> Result<RetentionCleanupService> {
        Ok(RetentionCleanupService::new(
            self.config.retention.clone(),
            self.history.clone(),
            Arc::new(TokioFileStore::new()),
            Arc::new(SystemProbeImpl::new()),
            Arc::new(CronTrigger::new()),
            Arc::new(NullNotifier),
            Arc::new(SystemTimeProvider),
        )?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let engine = Engine::open(&cli.config).await?;

    match cli.command {
        Commands::Preview { set } => {
            let overrides = parse_overrides(set.as_deref())?;
            let result = engine
                .cleanup_service()?
                .get_cleanup_preview(overrides.as_ref())
                .await?;
            print_result("Cleanup preview", &result);
        }

        Commands::Run { dry_run, set } => {
            let mut overrides = parse_overrides(set.as_deref())?.unwrap_or_else(|| json!({}));
            if !overrides.is_object() {
                anyhow::bail!("--set must be a JSON object");
            }
            if dry_run {
                overrides["safety"]["dry_run"] = json!(true);
            }
            let result = engine
                .cleanup_service()?
                .run_cleanup(Some(&overrides))
                .await?;
            print_result("Cleanup", &result);
        }

        Commands::Force { job_ids, strategy } => {
            let result = engine
                .cleanup_service()?
                .force_cleanup(&job_ids, strategy)
                .await?;
            print_result(&format!("Forced {} cleanup", strategy), &result);
        }

        Commands::History { status, all } => {
            let jobs = engine.history.get_all_jobs().await?;
            let rows: Vec<HistoryRow> = jobs
                .iter()
                .filter(|job| all || !job.deleted)
                .filter(|job| status.map_or(true, |s| job.status == s))
                .map(HistoryRow::from)
                .collect();

            if rows.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                println!("{}", format!("{} jobs", rows.len()).cyan().bold());
                println!("{}", Table::new(rows));
            }
        }

        Commands::Config => {
            println!("{}", "Retention config".cyan().bold());
            println!("{}", serde_json::to_string_pretty(&engine.config.retention)?);
        }
    }

    Ok(())
}
