use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use callbridge_core::config::{Config, LoggingConfig};
use callbridge_providers::{EchoBackend, GeminiLiveBackend, RealtimeBackend};

#[derive(Parser)]
#[command(
    name = "callbridge",
    about = "Bridge phone calls to a realtime voice AI with tool calling",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the call gateway
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Answer calls with the offline echo backend instead of Gemini Live
        #[arg(long)]
        echo: bool,
    },

    /// Tool registry management
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the TwiML returned to inbound calls
    Twiml,
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List the tools exposed to the model
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

/// Build the log filter: `RUST_LOG`, then `logging.level` plus `logging.filters`, then the default.
fn env_filter(logging: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let default = if verbose { "debug" } else { "info" };
    let mut directives = vec![
        logging
            .and_then(|l| l.level.clone())
            .filter(|_| !verbose)
            .unwrap_or_else(|| default.to_string()),
    ];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new(default))
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = env_filter(logging, verbose);
    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn backend(config: &Config, echo: bool) -> anyhow::Result<Arc<dyn RealtimeBackend>> {
    if echo {
        tracing::warn!("Using the echo backend; callers will hear themselves");
        return Ok(Arc::new(EchoBackend::new()));
    }
    Ok(Arc::new(GeminiLiveBackend::from_config(config)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, echo } => {
            let port = port.unwrap_or_else(|| config.port());
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{error}");
                }
                anyhow::bail!("invalid configuration in {}", config_path.display());
            }

            let backend = backend(&config, echo)?;
            let state = Arc::new(callbridge_gateway::GatewayState::new(config, backend).await?);
            tracing::info!("Starting CallBridge on port {port}");
            callbridge_gateway::start_gateway(state, port).await?;
        }
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                let state =
                    callbridge_gateway::GatewayState::new(config, Arc::new(EchoBackend::new())).await?;
                let snapshot = state.registry.snapshot();
                println!("Definitions: {}", state.store.path().display());
                if snapshot.is_empty() {
                    println!("No tools registered.");
                }
                for name in snapshot.names() {
                    let bound = snapshot
                        .get(name)
                        .is_some_and(|t| t.implementation.is_some());
                    let marker = if bound { "" } else { "  (no implementation)" };
                    println!("  {name}{marker}");
                }
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("Config file: {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK ({})", config_path.display());
            }
        },
        Commands::Twiml => {
            let url = callbridge_gateway::twiml::stream_url(
                config.public_hostname().as_deref(),
                None,
                config.port(),
            );
            println!(
                "{}",
                callbridge_gateway::twiml::incoming_call_twiml(&config.greeting(), &url)
            );
        }
    }

    Ok(())
}
