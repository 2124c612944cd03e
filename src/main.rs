#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sessionrelay::agent::{ConnectionMonitor, SharedConnectionStatus};
use sessionrelay::events::SessionEventHub;
use sessionrelay::gateway::{self, AppState};
use sessionrelay::persistence::{self, SqliteSessionStore};
use sessionrelay::sessions::SessionRegistry;
use sessionrelay::{tools, Config, SessionCommands, SessionRelay};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `sessionrelay` - durable sessions and live event fan-out for agent clients.
#[derive(Parser, Debug)]
#[command(name = "sessionrelay")]
#[command(version)]
#[command(about = "Relay web clients onto long-lived agent sessions.", long_about = None)]
struct Cli {
    /// Config directory (overrides SESSIONRELAY_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    #[command(long_about = "\
Start the HTTP/WebSocket gateway.

Serves the session REST API and the per-session event stream. Bind \
address defaults to the values in your config file (gateway.host / \
gateway.port).

Examples:
  sessionrelay serve                  # use config defaults
  sessionrelay serve -p 8080          # listen on port 8080
  sessionrelay serve --host 0.0.0.0   # bind to all interfaces
  sessionrelay serve -p 0             # random available port")]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Copy flat-file sessions into the SQLite store
    #[command(long_about = "\
Copy flat-file sessions into the SQLite store.

Reads client-config.json and sessions/*.json under the source \
directory and inserts anything the database does not already hold. \
Running it twice is safe: existing records are reported as skipped.

Examples:
  sessionrelay migrate
  sessionrelay migrate --source ~/old-relay/data")]
    Migrate {
        /// Flat-file data directory; defaults to the configured data_dir
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Inspect and delete stored sessions
    Sessions {
        #[command(subcommand)]
        session_command: SessionCommands,
    },

    /// Show configuration and store status
    Status,

    /// Manage configuration
    #[command(long_about = "\
Manage sessionrelay configuration.

Use 'schema' to dump the full JSON Schema for config.toml, which \
documents every available key, type, and default value.

Examples:
  sessionrelay config schema              # print JSON Schema to stdout
  sessionrelay config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `sessionrelay`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(sessionrelay completions bash)
  sessionrelay completions zsh > ~/.zfunc/_sessionrelay
  sessionrelay completions fish > ~/.config/fish/completions/sessionrelay.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    // Completions and the schema dump stay stdout-only: no config, no logging.
    match &cli.command {
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            return write_shell_completion(*shell, &mut stdout);
        }
        Commands::Config {
            config_command: ConfigCommands::Schema,
        } => {
            let schema = schemars::schema_for!(Config);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }
        _ => {}
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = Config::load_or_init(cli.config_dir.as_deref()).await?;

    match cli.command {
        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),

        Commands::Serve { port, host } => {
            let mut config = config;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            serve(config).await
        }

        Commands::Migrate { source } => {
            let source = source.unwrap_or_else(|| config.data_dir.clone());
            let destination = SqliteSessionStore::open(&config.database_path())?;
            info!(
                source = %source.display(),
                destination = %config.database_path().display(),
                "Starting migration"
            );
            let report = persistence::migrate(&source, &destination).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_clean() {
                Ok(())
            } else {
                bail!("Migration finished with {} error(s)", report.errors.len())
            }
        }

        Commands::Sessions { session_command } => {
            handle_session_command(session_command, &config).await
        }

        Commands::Status => {
            let store = persistence::create_store(&config)?;
            let sessions = store.list_session_ids().await?;
            let client_config = store.load_client_config().await?;

            println!("sessionrelay status");
            println!();
            println!("Version:     {}", env!("CARGO_PKG_VERSION"));
            println!("Config:      {}", config.config_path.display());
            println!("Data dir:    {}", config.data_dir.display());
            println!();
            println!("Store:       {}", store.name());
            if store.name() == "sqlite" {
                println!("Database:    {}", config.database_path().display());
            }
            println!("Sessions:    {}", sessions.len());
            println!(
                "Client:      {}",
                client_config.map_or("(not configured)", |c| c.transport.as_str())
            );
            println!();
            println!(
                "Gateway:     http://{}:{}",
                config.gateway.host, config.gateway.port
            );
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let store = persistence::create_store(&config)?;
    let registry = Arc::new(SessionRegistry::new(store.clone()));
    let hub = Arc::new(SessionEventHub::new(config.events.subscriber_buffer));
    let relay = Arc::new(SessionRelay::new(registry, hub));

    let state = AppState::new(
        relay.clone(),
        store,
        Arc::new(SharedConnectionStatus::default()) as Arc<dyn ConnectionMonitor>,
        Arc::new(tools::default_tools()),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    info!(
        host = %config.gateway.host,
        port = config.gateway.port,
        backend = config.storage.backend.as_str(),
        "Starting sessionrelay gateway"
    );
    let result = gateway::run_gateway(state, &config.gateway, shutdown).await;
    relay.shutdown().await;
    result
}

async fn handle_session_command(command: SessionCommands, config: &Config) -> Result<()> {
    let store = persistence::create_store(config)?;

    match command {
        SessionCommands::List { json } => {
            let sessions = store.load_all_metadata().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
                return Ok(());
            }
            if sessions.is_empty() {
                println!("No sessions stored.");
                return Ok(());
            }
            println!(
                "{:<38} {:<20} {:>8}  {:<25} SUMMARY",
                "ID", "MODEL", "MESSAGES", "LAST ACTIVITY"
            );
            for meta in &sessions {
                println!(
                    "{:<38} {:<20} {:>8}  {:<25} {}",
                    meta.session_id,
                    meta.config.model,
                    meta.message_count,
                    meta.last_activity_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    meta.summary.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }

        SessionCommands::Show { id, tail } => {
            let Some(mut record) = store.load_session(&id).await? else {
                bail!("Session not found: {id}");
            };
            if let Some(tail) = tail {
                let skip = record.messages.len().saturating_sub(tail);
                record.messages.drain(..skip);
            }
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        SessionCommands::Delete { id, yes } => {
            if !store.session_exists(&id).await? {
                bail!("Session not found: {id}");
            }
            if !yes {
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(format!("Delete session {id} and all its messages?"))
                    .default(false)
                    .interact()
                    .context("Failed to read confirmation")?;
                if !confirmed {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            store.delete_session(&id).await?;
            println!("Deleted session {id}.");
            Ok(())
        }
    }
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
