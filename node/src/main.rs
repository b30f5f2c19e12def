//! `ledgerpdf` binary: CLI entry point wiring the core ledger, crypto,
//! network, and consensus crates together (spec.md §6).

mod commands;
mod config;
mod keys;
mod pdf;
mod similarity;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser, Debug)]
#[command(name = "ledgerpdf", version, about = "Tamper-evident, replicated PDF ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign, mine, and append every page of a document.
    Register(commands::register::RegisterArgs),
    /// Re-derive a page's digest and signature, optionally diagnosing drift.
    Verify(commands::verify::VerifyArgs),
    /// Report chain height, tip hash, and validity.
    Status(commands::status::StatusArgs),
    /// Run the networked node: handshake, sync, mining lock, mining worker.
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Chrono-backed local timestamps on every log line, matching the
    // per-subsystem logging the source split across separate file handles
    // (`original_source/logging_config.py`) now expressed as `tracing`
    // targets instead.
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%dT%H:%M:%S%.3f%:z".to_string()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Register(args) => commands::register::run(args).await,
        Command::Verify(args) => commands::verify::run(args).await,
        Command::Status(args) => commands::status::run(args).await,
        Command::Serve(args) => commands::serve::run(args).await,
    }
}
