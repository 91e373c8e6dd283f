// ABOUTME: CLI argument parsing and command routing for syncgate
//
// One subcommand per deployable role:
// - node: supervise the chain node with flow control
// - relay: multi-target TCP relay with pause/drain
// - helper: supervise an external relay executable
// - combined: node and relay in one process
// - status: aggregate the status of other control endpoints
//
// Every flag falls back to an environment variable of the same meaning.

pub mod combined;
pub mod helper;
pub mod node;
pub mod relay;
pub mod status;
pub mod util;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use syncgate::logging::LogFormat;
use syncgate::relay::{RelayTable, TcpRelay};
use syncgate::services::NodeOptions;
use syncgate::sync::{CheckpointStore, PauseTarget, StateDirs, VersionTable, DEFAULT_SYNC_PATTERN};

/// Node sidecar: supervises a chain node, relays its peer traffic and pauses
/// sync while an indexer catches up
#[derive(Parser)]
#[command(name = "syncgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log line format
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the node under supervision with epoch pauses and hard-fork switching
    Node(NodeArgs),

    /// Run the multi-target TCP relay
    Relay(RelayArgs),

    /// Run an external relay executable under supervision
    Helper(HelperArgs),

    /// Run the node and the relay in one process
    Combined(CombinedArgs),

    /// Serve the aggregated status of other control endpoints
    Status(StatusArgs),
}

/// Where the control endpoint listens
#[derive(clap::Args)]
pub struct ControlArgs {
    /// Control endpoint bind host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Control endpoint port (defaults depend on the command)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

/// Node binary, its data and flow control settings
#[derive(clap::Args)]
pub struct NodeConfig {
    /// Node binary used when no version table is given
    #[arg(long, env = "NODE", default_value = "namada")]
    pub node: String,

    /// Arguments passed to the node, whitespace separated
    #[arg(long, env = "NODE_ARGS", default_value = "node ledger run")]
    pub node_args: String,

    /// Hard-fork version table: height=binary[,height=binary...], must start at 0
    #[arg(long, env = "NODE_VERSIONS")]
    pub node_versions: Option<String>,

    /// Chain whose state directories are wiped on restart
    #[arg(long, env = "CHAIN_ID", default_value = "housefire-reduce.e51ecf4264fc3")]
    pub chain_id: String,

    /// Node base directory holding one directory per chain
    #[arg(long, env = "DATA_DIR", default_value = "/home/namada/.local/share/namada")]
    pub data_dir: PathBuf,

    /// Regex with two capture groups: block height, then epoch
    #[arg(long, env = "SYNC_PATTERN", default_value = DEFAULT_SYNC_PATTERN)]
    pub sync_pattern: String,

    /// Persist epoch and version here across restarts
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Delay between relay pause attempts in milliseconds
    #[arg(long, env = "PAUSE_RETRY_MS", default_value_t = 1000)]
    pub pause_retry_ms: u64,
}

impl NodeConfig {
    /// Validate and turn into service options
    pub fn options(&self, pause_target: Option<Arc<dyn PauseTarget>>) -> Result<NodeOptions> {
        let versions = match &self.node_versions {
            Some(table) => VersionTable::parse(table).context("Invalid NODE_VERSIONS")?,
            None => VersionTable::single(&self.node).context("Invalid NODE")?,
        };

        Ok(NodeOptions {
            name: "node".to_string(),
            args: self.node_args.split_whitespace().map(ToString::to_string).collect(),
            versions,
            sync_pattern: self.sync_pattern.clone(),
            state_dirs: StateDirs::new(&self.data_dir, &self.chain_id),
            pause_target,
            retry_delay: Duration::from_millis(self.pause_retry_ms),
            checkpoint: self.state_file.as_ref().map(CheckpointStore::new),
        })
    }
}

/// Relay routes and connection settings
#[derive(clap::Args)]
pub struct RelayConfig {
    /// Routes: LPORT=RHOST:RPORT[,LPORT=RHOST:RPORT]*
    #[arg(long, env = "CONFIG")]
    pub config: String,

    /// Host the relay listeners bind to
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub listen_host: String,

    /// Outbound connect timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,
}

impl RelayConfig {
    /// Validate the route table and build the relay
    pub fn relay(&self) -> Result<TcpRelay> {
        let table = RelayTable::parse(&self.config).context("Invalid relay CONFIG")?;
        Ok(TcpRelay::new(
            table,
            self.listen_host.clone(),
            Duration::from_secs(self.connect_timeout_secs),
        ))
    }
}

/// Arguments for the node command
#[derive(clap::Args)]
pub struct NodeArgs {
    #[command(flatten)]
    pub control: ControlArgs,

    #[command(flatten)]
    pub node: NodeConfig,

    /// Control endpoint of the relay to pause on each new epoch, e.g. http://sync-proxy:25552
    #[arg(long, env = "RELAY_CONTROL")]
    pub relay_control: Option<String>,
}

/// Arguments for the relay command
#[derive(clap::Args)]
pub struct RelayArgs {
    #[command(flatten)]
    pub control: ControlArgs,

    #[command(flatten)]
    pub relay: RelayConfig,
}

/// Arguments for the helper command
#[derive(clap::Args)]
pub struct HelperArgs {
    #[command(flatten)]
    pub control: ControlArgs,

    /// Relay executable to supervise
    #[arg(long, env = "PROXY", default_value = "simpleproxy")]
    pub proxy: String,

    /// Local address the helper listens on
    #[arg(long, env = "LOCAL", default_value = ":26657")]
    pub local: String,

    /// Remote address the helper forwards to
    #[arg(long, env = "REMOTE", default_value = "node:26657")]
    pub remote: String,
}

/// Arguments for the combined command
#[derive(clap::Args)]
pub struct CombinedArgs {
    #[command(flatten)]
    pub control: ControlArgs,

    #[command(flatten)]
    pub node: NodeConfig,

    #[command(flatten)]
    pub relay: RelayConfig,
}

/// Arguments for the status command
#[derive(clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub control: ControlArgs,

    /// Endpoints to query: name=url[,name=url...]
    #[arg(
        long,
        env = "TARGETS",
        default_value = "index=http://rpc-proxy:25550,node=http://node:25551,sync=http://sync-proxy:25552"
    )]
    pub targets: String,

    /// Per-target request timeout in seconds
    #[arg(long, env = "STATUS_TIMEOUT_SECS", default_value_t = 5)]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_node_defaults() {
        let cli = Cli::try_parse_from(["syncgate", "node"]).unwrap();
        let Commands::Node(args) = cli.command else {
            panic!("expected node command");
        };

        let options = args.node.options(None).unwrap();
        assert_eq!(options.args, vec!["node", "ledger", "run"]);
        assert_eq!(options.versions.base(), "namada");
        assert_eq!(options.sync_pattern, DEFAULT_SYNC_PATTERN);
        assert!(options.checkpoint.is_none());
        assert!(args.relay_control.is_none());
    }

    #[test]
    fn test_node_version_table_must_start_at_zero() {
        let cli = Cli::try_parse_from(["syncgate", "node", "--node-versions", "100=namada-v2"]).unwrap();
        let Commands::Node(args) = cli.command else {
            panic!("expected node command");
        };

        assert!(args.node.options(None).is_err());
    }

    #[test]
    fn test_relay_requires_valid_config() {
        let cli = Cli::try_parse_from(["syncgate", "relay", "--config", "26666=a:1,26666=b:2"]).unwrap();
        let Commands::Relay(args) = cli.command else {
            panic!("expected relay command");
        };

        let err = args.relay.relay().err().unwrap();
        assert!(format!("{err:#}").contains("Duplicate local port in config: 26666"));
    }
}
