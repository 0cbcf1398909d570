mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::gen_logs::GenLogsArgs;
use commands::replay::ReplayArgs;

#[derive(Parser, Debug)]
#[command(name = "writeapi", version, about = "Write API output relay tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive JSON-lines files through Init/Flush/Exit against an in-memory table
    Replay(ReplayArgs),

    /// Append demo log lines to files at a fixed interval
    GenLogs(GenLogsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    match cli.command {
        Command::Replay(args) => commands::replay::cmd_replay(&args).await,
        Command::GenLogs(args) => commands::gen_logs::cmd_gen_logs(&args).await,
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}
