//! cardcat: library volume operator tool
//!
//! Usage:
//!   cardcat import ~/Books --name "My Books" --set author=me
//!   cardcat ls ~/Books --below /Austen
//!   cardcat stats ~/Books
//!
//! Reports go to stdout, logs to stderr.

use anyhow::Result;
use cardcat_cli::{execute, Args};
use clap::Parser;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    debug!("Running {:?}", args.command);
    let mut stdout = std::io::stdout().lock();
    execute(args.command, &mut stdout).await
}
