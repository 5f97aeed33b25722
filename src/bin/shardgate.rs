//! Shardgate CLI binary.

use anyhow::Result;
use clap::Parser;

use shardgate::cli::args::ShardgateArgs;
use shardgate::cli::commands::execute_command;

fn main() -> Result<()> {
    let args = ShardgateArgs::parse();

    let default_level = match args.verbosity() {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    execute_command(args)?;
    Ok(())
}
