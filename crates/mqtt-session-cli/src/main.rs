use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::connect_cmd::{self, ConnectCommand};

#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Open and close MQTT sessions the way a load-test host would")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log session lifecycle events
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log protocol-level detail
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Establish, hold and terminate sessions for a number of iterations
    Connect(ConnectCommand),
}

/// `RUST_LOG` wins over the flags when set.
pub(crate) fn init_basic_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect(cmd) => connect_cmd::execute(cmd, cli.verbose, cli.debug).await,
    }
}
