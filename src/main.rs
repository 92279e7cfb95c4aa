//! SPDK Manager CLI
//!
//! Thin command-line surface over the library: unified device inventory,
//! per-device lookups and direct engine calls.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spdk_manager::{InventoryService, ManagerConfig, RpcTransport, SpdkClient};

// =============================================================================
// CLI Arguments
// =============================================================================

/// SPDK Manager - storage engine control and block device inventory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine JSON-RPC socket path
    #[arg(short, long, env = "DEFAULT_SPDK_SOCKET")]
    socket: Option<PathBuf>,

    /// Engine call timeout in milliseconds
    #[arg(long, env = "SPDK_TIMEOUT")]
    timeout_ms: Option<u64>,

    /// YAML configuration file
    #[arg(short, long, env = "SPDK_MANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the metrics exposition to stderr before exiting
    #[arg(long)]
    dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unified inventory of all block devices
    Inventory,
    /// Aggregate inventory statistics
    Stats,
    /// One device by name or path
    Device { name: String },
    /// SMART health of one device
    Health { name: String },
    /// Raw SMART data of one device
    Smart { name: String },
    /// Engine version
    Version,
    /// Check that the engine socket answers
    Ping,
    /// Issue an arbitrary engine method
    Rpc {
        method: String,
        /// Parameters as a JSON document
        params: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    debug!("Using engine socket {}", config.rpc.socket_path.display());

    let result = run(&args.command, &config).await;

    if args.dump_metrics {
        eprint!("{}", spdk_manager::metrics::gather_text());
    }

    result
}

async fn run(command: &Command, config: &ManagerConfig) -> anyhow::Result<()> {
    match command {
        Command::Inventory => {
            let service = InventoryService::from_config(config);
            print_json(&service.inventory_report().await)
        }
        Command::Stats => {
            let service = InventoryService::from_config(config);
            print_json(&service.stats().await)
        }
        Command::Device { name } => {
            let service = InventoryService::from_config(config);
            print_json(&service.device(name).await?)
        }
        Command::Health { name } => {
            let service = InventoryService::from_config(config);
            print_json(&service.device_health(name).await?)
        }
        Command::Smart { name } => {
            let service = InventoryService::from_config(config);
            print_json(&service.smart_info(name).await?)
        }
        Command::Version => print_json(&client(config).get_version().await?),
        Command::Ping => {
            client(config).check_connection().await?;
            info!("Engine reachable at {}", config.rpc.socket_path.display());
            println!("ok");
            Ok(())
        }
        Command::Rpc { method, params } => {
            let params = params
                .as_deref()
                .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
                .transpose()
                .context("params must be a JSON document")?;
            print_json(&client(config).call_raw(method, params).await?)
        }
    }
}

fn client(config: &ManagerConfig) -> SpdkClient {
    SpdkClient::new(std::sync::Arc::new(RpcTransport::new(&config.rpc)))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> anyhow::Result<ManagerConfig> {
    let mut config = match &args.config {
        Some(path) => ManagerConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    if let Some(socket) = &args.socket {
        config.rpc.socket_path = socket.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.rpc.timeout_ms = timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
