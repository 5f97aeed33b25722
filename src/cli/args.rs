//! Command line argument parsing for the shardgate CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationAlgorithm;
use crate::config::Deployment;

/// Shardgate - fan-out and aggregation core of a vector search gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "shardgate")]
#[command(about = "Load-balancing gateway core for distributed vector search")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct ShardgateArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl ShardgateArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run searches against an in-memory agent cluster
    Simulate(SimulateArgs),

    /// Validate a JSON gateway configuration file
    #[command(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}

/// Arguments for a simulated cluster run
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Gateway configuration file (JSON); defaults are used when omitted
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Number of agents in the cluster
    #[arg(short, long, default_value = "3")]
    pub agents: usize,

    /// Number of objects loaded into the cluster
    #[arg(short, long, default_value = "1000")]
    pub objects: usize,

    /// Vector dimension
    #[arg(short, long, default_value = "8")]
    pub dimension: usize,

    /// Number of search queries to run
    #[arg(long, default_value = "10")]
    pub queries: usize,

    /// Global top-K per query
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: u32,

    /// How objects are laid out across agents
    #[arg(long, default_value = "replicated")]
    pub deployment: DeploymentArg,

    /// Quorum success ratio (0, 1]
    #[arg(long)]
    pub ratio: Option<f32>,

    /// Aggregation algorithm hint (auto, pass_through, sort_slice, bounded_heap)
    #[arg(long, default_value = "auto")]
    pub algorithm: String,

    /// Number of agents answering every call with `unavailable`
    #[arg(long, default_value = "0")]
    pub fail_agents: usize,

    /// Random seed for reproducible vectors
    #[arg(long)]
    pub seed: Option<u64>,
}

impl SimulateArgs {
    pub fn algorithm(&self) -> AggregationAlgorithm {
        // parsing never fails, unknown names select the bounded heap
        self.algorithm.parse().unwrap_or(AggregationAlgorithm::BoundedHeap)
    }
}

/// Arguments for validating a configuration file
#[derive(Parser, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Path to the configuration file
    #[arg(value_name = "CONFIG_FILE")]
    pub path: PathBuf,
}

/// Index layout accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentArg {
    Sharded,
    Replicated,
}

impl From<DeploymentArg> for Deployment {
    fn from(arg: DeploymentArg) -> Self {
        match arg {
            DeploymentArg::Sharded => Deployment::Sharded,
            DeploymentArg::Replicated => Deployment::Replicated,
        }
    }
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_command() {
        let args = ShardgateArgs::try_parse_from([
            "shardgate",
            "simulate",
            "--agents",
            "5",
            "-k",
            "20",
            "--deployment",
            "sharded",
            "--algorithm",
            "sort-slice",
            "--fail-agents",
            "1",
        ])
        .unwrap();

        if let Command::Simulate(simulate) = args.command {
            assert_eq!(simulate.agents, 5);
            assert_eq!(simulate.top_k, 20);
            assert_eq!(simulate.objects, 1000);
            assert_eq!(simulate.fail_agents, 1);
            assert_eq!(simulate.deployment, DeploymentArg::Sharded);
            assert_eq!(simulate.algorithm(), AggregationAlgorithm::SortSlice);
        } else {
            panic!("Expected simulate command");
        }
    }

    #[test]
    fn test_check_config_command() {
        let args =
            ShardgateArgs::try_parse_from(["shardgate", "check-config", "gateway.json"]).unwrap();
        if let Command::CheckConfig(check) = args.command {
            assert_eq!(check.path, PathBuf::from("gateway.json"));
        } else {
            panic!("Expected check-config command");
        }
    }

    #[test]
    fn test_verbosity_levels() {
        let args = ShardgateArgs::try_parse_from(["shardgate", "simulate"]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = ShardgateArgs::try_parse_from(["shardgate", "-vv", "simulate"]).unwrap();
        assert_eq!(args.verbosity(), 2);

        let args = ShardgateArgs::try_parse_from(["shardgate", "--quiet", "simulate"]).unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_output_format() {
        let args =
            ShardgateArgs::try_parse_from(["shardgate", "--format", "json", "simulate"]).unwrap();
        assert!(matches!(args.output_format, OutputFormat::Json));
    }
}
