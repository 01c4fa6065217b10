mod workflows;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stepwise_core::config::AppConfig;
use stepwise_core::traits::ExecutionStore;
use stepwise_engine::WorkflowRegistry;
use stepwise_memory::{MemoryExecutionStore, SqliteExecutionStore};

#[derive(Parser)]
#[command(name = "stepwise", version, about = "Suspendable multi-step agent workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stepwise.toml", env = "STEPWISE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/SSE gateway (default)
    Serve,
    /// Show the resolved configuration
    Config,
    /// List the built-in workflows
    Workflows,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stepwise=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };

    if let Some(Commands::Config) = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let store: Arc<dyn ExecutionStore> = match config.store.resolved_path() {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite execution store");
            Arc::new(SqliteExecutionStore::open(&path)?)
        }
        None => {
            info!("Using in-memory execution store");
            Arc::new(MemoryExecutionStore::new())
        }
    };

    let registry = Arc::new(WorkflowRegistry::new(store, config.engine.clone()));
    workflows::register_builtin(&registry)?;

    match cli.command {
        Some(Commands::Workflows) => {
            for summary in registry.list() {
                println!(
                    "{:<20} {:<24} {}",
                    summary.id,
                    summary.name,
                    summary.step_ids.join(" -> ")
                );
            }
        }
        Some(Commands::Serve) | None => {
            info!(bind = %config.gateway.bind, "Starting gateway");
            let server = stepwise_gateway::GatewayServer::new(config.gateway.clone(), registry);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Some(Commands::Config) | Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}
