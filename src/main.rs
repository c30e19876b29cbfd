//! soldb-dap - debug adapter for recorded EVM transaction traces
//!
//! Editors start this binary and talk DAP over its stdin/stdout. Logs go to
//! stderr, a log file and the diagnostics side-channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;

use soldb_dap::common::{config::Config, logging};
use soldb_dap::evm::deploy::CommandDeployer;
use soldb_dap::evm::recorded::RecordedFactory;
use soldb_dap::{diagnostics, Adapter, Server};

#[derive(Parser)]
#[command(name = "soldb-dap", about = "Debug adapter for recorded EVM transaction traces")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file [default: <config dir>/soldb-dap/config.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address of the diagnostics listener
    #[arg(long, value_name = "ADDR")]
    diagnostics_addr: Option<SocketAddr>,

    /// Do not open the diagnostics listener
    #[arg(long)]
    no_diagnostics: bool,

    /// Wait this long for a diagnostics client before serving
    #[arg(long, value_name = "MS")]
    wait_for_diagnostics: Option<u64>,

    /// Log to stderr only
    #[arg(long)]
    no_log_file: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.diagnostics_addr {
            config.diagnostics.address = addr;
        }
        if self.no_diagnostics {
            config.diagnostics.enabled = false;
        }
        if let Some(ms) = self.wait_for_diagnostics {
            config.diagnostics.startup_wait_ms = ms;
        }
        if self.no_log_file {
            config.logging.file = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> soldb_dap::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let (sink, channel) = if config.diagnostics.enabled {
        let (sink, channel) = diagnostics::channel();
        (Some(sink), Some(channel))
    } else {
        (None, None)
    };
    let log_guard = logging::init(config.logging.file, sink);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting soldb-dap"
    );
    if let Some(path) = &log_guard.log_file {
        tracing::info!("Logging to {}", path.display());
    }

    if let Some(channel) = channel {
        let addr = config.diagnostics.address;
        match channel.serve(addr).await {
            Ok(mut handle) => {
                tracing::info!("Diagnostics listening on {}", handle.local_addr());
                let wait = config.diagnostics.startup_wait_ms;
                if wait > 0 {
                    let connected = handle.wait_for_client(Duration::from_millis(wait)).await;
                    tracing::debug!(connected, "Done waiting for a diagnostics client");
                }
            }
            Err(e) => tracing::warn!("Diagnostics disabled, cannot bind {}: {}", addr, e),
        }
    }

    let mut adapter = Adapter::new(Box::new(RecordedFactory), config.launch.clone());
    match config.deploy_command() {
        Some(program) => {
            tracing::info!("contractFile launches deploy with {}", program.display());
            let deployer = CommandDeployer::new(program, config.deploy.args.clone());
            adapter = adapter.with_deployer(Box::new(deployer));
        }
        None => {
            if let Some(command) = &config.deploy.command {
                tracing::warn!("Deploy command '{}' not found", command);
            }
        }
    }

    let server = Server::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), adapter);
    server.run().await?;

    tracing::info!("soldb-dap exiting");
    Ok(())
}
