use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use warden_core::{DefaultContextualizer, OpContext, Persister, PersisterConfig};

/// Warden - tenant-isolated persistence maintenance
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides the configured path
    #[arg(short, long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Purge expired records of this deployment's network
    Cleanup {
        /// Pause between cleanup targets
        #[arg(long, value_parser = parse_duration)]
        wait: Option<Duration>,

        /// Only purge records that expired longer ago than this
        #[arg(long, value_parser = parse_duration)]
        older_than: Option<Duration>,

        /// Maximum rows deleted per target
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,

    /// Revert the most recent migrations
    Down {
        /// How many migrations to revert; 0 reverts all
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Show applied and pending migrations
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Parse `500ms`, `30s`, `5m`, `6h` or `2d`; a bare number is seconds
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;

    if unit == "ms" {
        return Ok(Duration::from_millis(value));
    }
    let scale: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
    };
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{input}' is too large"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PersisterConfig> {
    let mut config = match &cli.config {
        Some(path) => PersisterConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PersisterConfig::default(),
    };
    if let Some(database) = &cli.database {
        config = config.with_database_path(database);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    tracing::debug!("Using database {}", config.database.path.display());
    let persister = Persister::open(&config, Arc::new(DefaultContextualizer))?;

    match cli.command {
        Commands::Migrate { action } => match action {
            MigrateAction::Up => {
                persister.migrate_up()?;
                println!("Database is up to date");
            }
            MigrateAction::Down { steps } => {
                persister.migrate_down(steps)?;
                println!("Reverted {} migration(s)", if steps == 0 { "all".to_string() } else { steps.to_string() });
            }
            MigrateAction::Status { json } => {
                let status = persister.migration_status()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                } else {
                    println!("{:<16} {:<10} {:<28} NAME", "VERSION", "STATE", "APPLIED AT");
                    for entry in &status {
                        let applied_at = entry
                            .applied_at
                            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
                            .unwrap_or_else(|| "-".to_string());
                        let state = if entry.is_applied() { "applied" } else { "pending" };
                        println!("{:<16} {:<10} {:<28} {}", entry.version, state, applied_at, entry.name);
                    }
                    if status.has_pending() {
                        println!("\n{} pending migration(s)", status.pending().count());
                    }
                }
            }
        },
        Commands::Cleanup {
            wait,
            older_than,
            batch_size,
        } => {
            if persister.migration_status()?.has_pending() {
                bail!("the database has pending migrations; run `warden migrate up` first");
            }

            let persister = match config.network_id {
                Some(_) => persister,
                None => {
                    let network = persister.determine_network()?;
                    persister.with_network_id(network.id)
                }
            };

            let wait = wait.unwrap_or_else(|| config.cleanup.wait());
            let older_than = older_than.unwrap_or_else(|| config.cleanup.older_than());
            let batch_size = batch_size.unwrap_or(config.cleanup.batch_size);
            if batch_size == 0 {
                bail!("--batch-size must be greater than zero");
            }

            let report = persister.cleanup_database_with_report(
                &OpContext::new(),
                wait,
                older_than,
                batch_size,
            )?;
            for (target, deleted) in &report.deleted {
                println!("{:<24} {}", target, deleted);
            }
            println!("Deleted {} expired record(s)", report.total());
        }
    }

    Ok(())
}
