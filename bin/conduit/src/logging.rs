//! Logging bootstrap: `tracing-subscriber` fmt layer plus the telemetry log
//! bridge, with an env-filter built from `-v`/`--quiet`/`RUST_LOG`, plus
//! custom directives layered on top.

use std::sync::Arc;

use conduit_primitives::TelemetrySink;
use conduit_telemetry::TelemetryLogLayer;
use eyre::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogArgs;

/// Install the process-wide subscriber. Must run before any other
/// `tracing` call; this is why `telemetry` is connected first in `main` and
/// handed in here rather than constructed after logging starts.
pub fn init(args: &LogArgs, node_id: String, telemetry: Arc<dyn TelemetrySink>) -> Result<()> {
    let filter = build_filter(args);

    let telemetry_layer = TelemetryLogLayer::new(node_id, telemetry);

    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(telemetry_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(telemetry_layer)
            .try_init()?;
    }

    Ok(())
}

fn build_filter(args: &LogArgs) -> EnvFilter {
    if args.quiet {
        return EnvFilter::new("error");
    }

    let base_level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

    if let Some(custom) = &args.filter {
        for directive in custom.split(',') {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    filter
}
