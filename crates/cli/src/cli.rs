//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// varnet - process-variable network runtime
#[derive(Parser, Debug)]
#[command(
    name = "varnet",
    author,
    version,
    about = "Process-variable network runtime",
    long_about = "Wires device registers and control-system variables into networks,\n\
                  resolves each network into direct links or fan-out dispatchers and\n\
                  keeps values, versions and validity flowing until stopped."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "VARNET_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "VARNET_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the topology and run it until interrupted
    Run(RunArgs),

    /// Validate and resolve a topology without running it
    Validate(ValidateArgs),

    /// Display topology information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to topology file (TOML or JSON)
    #[arg(short, long, default_value = "topology.toml", env = "VARNET_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value = "0", env = "VARNET_TIMEOUT")]
    pub timeout: u64,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", env = "VARNET_METRICS_PORT")]
    pub metrics_port: u16,

    /// Resolve the topology and exit without activating it
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to topology file to validate
    #[arg(short, long, default_value = "topology.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to topology file
    #[arg(short, long, default_value = "topology.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from([
            "varnet",
            "-vv",
            "--log-format",
            "compact",
            "run",
            "--config",
            "plant.toml",
            "--timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Compact));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("plant.toml"));
                assert_eq!(args.timeout, 5);
                assert_eq!(args.metrics_port, 0);
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["varnet", "-q", "-v", "info"]).is_err());
    }
}
