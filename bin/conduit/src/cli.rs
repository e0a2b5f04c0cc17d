//! Command-line surface: a config file path, layered `conduit-node`
//! overrides, and logging flags, split into per-concern `clap::Args`
//! groups.

use std::path::PathBuf;

use clap::{Args, Parser};
use conduit_node::ConfigOverrides;

/// conduit — an Interledger-style payment connector.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ConduitCli {
    /// Path to a TOML configuration file. Defaults are used for anything it
    /// omits; absent entirely, the built-in defaults apply.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Node configuration overrides (admin/metrics/telemetry toggles).
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Logging configuration.
    #[command(flatten)]
    pub logs: LogArgs,
}

/// Logging flags, applied independently of the telemetry emitter: `tracing`/`tracing-subscriber` always log to
/// stdout; telemetry is a separate, optional sink.
#[derive(Debug, Args)]
pub struct LogArgs {
    /// Silence all output below `error`.
    #[arg(long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv, -vvv raise the default level).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Emit logs as JSON lines instead of the human-readable format.
    #[arg(long)]
    pub json: bool,

    /// Extra `tracing_subscriber::EnvFilter` directives, comma separated.
    #[arg(long, value_name = "DIRECTIVES")]
    pub filter: Option<String>,
}
