// ABOUTME: Main entry point for syncgate
//
// Binary: syncgate
// Usage: syncgate [--log-format text|json] <COMMAND>
// - node: supervise the chain node with epoch pauses and hard-fork switching
// - relay: multi-target TCP relay with pause/drain
// - helper: supervise an external relay executable
// - combined: node and relay in one process
// - status: aggregate status of other control endpoints

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

mod cli;

use syncgate::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logging::init(args.log_format);
    logging::install_panic_hook();

    match args.command {
        cli::Commands::Node(node_args) => cli::node::execute(node_args).await,
        cli::Commands::Relay(relay_args) => cli::relay::execute(relay_args).await,
        cli::Commands::Helper(helper_args) => cli::helper::execute(helper_args).await,
        cli::Commands::Combined(combined_args) => cli::combined::execute(combined_args).await,
        cli::Commands::Status(status_args) => cli::status::execute(status_args).await,
    }
}
