/*!
 * dfsmon CLI - Command Line Interface
 *
 * Runs the worker loop as a foreground service, or performs one-off
 * operations against the same stores (single collection, enqueue a
 * collect-now command, inspect state, apply configuration).
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use dfsmon::{
    config::{Config, ServiceSettings},
    error::{MonitorError, SaveOutcome, EXIT_FAILURE, EXIT_REJECTED, EXIT_SUCCESS},
    logging,
    orchestrator::{Orchestrator, TRIGGER_MANUAL},
    wake::CommandWatcher,
    Worker,
};
use dfsmon_topology::InventoryTopology;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dfsmon")]
#[command(version, about = "Namespace and replication health monitor", long_about = None)]
struct Cli {
    /// Service settings file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    /// Topology inventory file (overrides the settings file)
    #[arg(long, value_name = "FILE", global = true)]
    inventory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker loop until Ctrl-C
    Run,

    /// Run one collection now and print a summary
    Collect,

    /// Ask a running worker to collect as soon as possible
    CollectNow {
        #[arg(long)]
        requested_by: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Print the runtime state of the last run
    Status,

    /// Print the most recent snapshot
    Latest,

    /// Configuration operations
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Push pending snapshots to the remote status root
    Flush,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration
    Show,

    /// Save a configuration document (rejected if another writer committed a newer version)
    Apply {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<MonitorError>()
                .map(MonitorError::exit_code)
                .unwrap_or(EXIT_FAILURE)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut settings = match cli.settings {
        Some(ref path) => ServiceSettings::from_file(path)?,
        None => ServiceSettings::default(),
    };
    if let Some(inventory) = cli.inventory.clone() {
        settings.inventory_path = inventory;
    }

    logging::init_logging(&settings)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(execute(cli.command, settings))
}

async fn execute(command: Commands, settings: ServiceSettings) -> anyhow::Result<i32> {
    let provider = Arc::new(InventoryTopology::new(&settings.inventory_path));
    let orchestrator = Orchestrator::bootstrap(&settings, provider).await?;

    match command {
        Commands::Run => {
            let orchestrator = Arc::new(orchestrator);
            let _watcher = if settings.watch_commands {
                match CommandWatcher::new(orchestrator.command_queue().dir(), orchestrator.wake()) {
                    Ok(watcher) => Some(watcher),
                    Err(e) => {
                        warn!(error = %e, "command directory watch unavailable, relying on polling");
                        None
                    }
                }
            } else {
                None
            };

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                }
                signal.cancel();
            });

            Worker::new(orchestrator).run(shutdown).await;
        }

        Commands::Collect => {
            let snapshot = orchestrator
                .run_collection(TRIGGER_MANUAL, &CancellationToken::new())
                .await?;
            println!("Overall health: {}", snapshot.overall_health);
            for ns in &snapshot.namespaces {
                println!(
                    "  namespace {:<24} {:<8} unreachable={}",
                    ns.namespace_id,
                    ns.health.to_string(),
                    ns.unreachable_targets()
                );
            }
            for group in &snapshot.replication_groups {
                println!(
                    "  group     {:<24} {:<8} members={} connections={}",
                    group.group_name,
                    group.health.to_string(),
                    group.members.len(),
                    group.connections.len()
                );
            }
            for error in &snapshot.errors {
                println!("  error: {}", error);
            }
        }

        Commands::CollectNow {
            requested_by,
            reason,
        } => {
            let requested_by = requested_by
                .or_else(|| std::env::var("USER").ok())
                .or_else(|| std::env::var("USERNAME").ok())
                .unwrap_or_else(|| "cli".to_string());
            let command = orchestrator
                .enqueue_collect_now(&requested_by, reason)
                .await?;
            println!("Queued collect-now command {}", command.id);
        }

        Commands::Status => {
            let state = orchestrator.get_runtime_state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }

        Commands::Latest => match orchestrator.load_latest_snapshot().await? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No snapshot available yet"),
        },

        Commands::Config(ConfigCommands::Show) => {
            let config = orchestrator.load_config().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Config(ConfigCommands::Apply { file }) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let config = Config::from_json(&raw)
                .with_context(|| format!("malformed configuration in {}", file.display()))?;

            match orchestrator.save_config(&config).await? {
                SaveOutcome::Committed(saved) => {
                    println!("Configuration committed (version {})", saved.version);
                }
                SaveOutcome::Unreachable { config, reason } => {
                    println!(
                        "Configuration cached locally (version {}); shared copy not updated: {}",
                        config.version, reason
                    );
                }
                SaveOutcome::Conflict {
                    attempted,
                    persisted,
                } => {
                    eprintln!(
                        "Rejected: version {} is stale, version {} is already committed. Reload and retry.",
                        attempted, persisted
                    );
                    return Ok(EXIT_REJECTED);
                }
                SaveOutcome::Timeout { path, waited } => {
                    eprintln!(
                        "Rejected: lock {} still held after {:?}",
                        path.display(),
                        waited
                    );
                    return Ok(EXIT_REJECTED);
                }
            }
        }

        Commands::Flush => {
            let report = orchestrator.flush_outbox().await?;
            println!(
                "Flushed {} snapshot(s), {} still pending",
                report.flushed, report.pending
            );
        }
    }

    Ok(EXIT_SUCCESS)
}
