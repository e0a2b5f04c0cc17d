//! `conduit` binary entry point: CLI parsing, logging bootstrap, and signal
//! handling, handing off to `conduit_node::Orchestrator` for everything
//! else (SPEC_FULL §2: "bin/conduit — CLI entry point, logging bootstrap,
//! signal handling").
//!
//! The external collaborators this binary wires up — `LedgerStore` and
//! `PeerTransport` — are the in-memory `testutil` doubles, not a production
//! backend; see `DESIGN.md` for why, and for how a real deployment would
//! swap them out.

mod cli;
mod logging;

use std::sync::Arc;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing::{info, warn};

use conduit_keys::LocalSigner;
use conduit_ledger::testutil::MemoryLedger;
use conduit_node::{NodeConfig, Orchestrator, OrchestratorDeps};
use conduit_pipeline::testutil::MemoryTransport;
use conduit_pipeline::DecodedPacket;
use conduit_primitives::{Amount, ConduitResult, NullSink, TelemetrySink};
use conduit_telemetry::{BufferingMode, TcpLineTransport, TelemetryEmitter};

use cli::ConduitCli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = ConduitCli::parse();

    let config =
        NodeConfig::load(cli.config.as_deref(), &cli.overrides).wrap_err("failed to load node configuration")?;

    // Connect telemetry (if configured) before installing the tracing
    // subscriber, so the very first log line already reaches
    // `TelemetryLogLayer`.
    let telemetry_emitter = if config.telemetry.enabled {
        let transport = Arc::new(TcpLineTransport::new(config.telemetry.addr.clone()));
        let buffering = if config.telemetry.buffering_enabled {
            BufferingMode::On(config.telemetry.buffer_config())
        } else {
            BufferingMode::Off
        };
        Some(TelemetryEmitter::connect(config.node_id.clone(), transport, buffering).await)
    } else {
        None
    };

    let telemetry: Arc<dyn TelemetrySink> = match &telemetry_emitter {
        Some(emitter) => Arc::clone(emitter) as Arc<dyn TelemetrySink>,
        None => Arc::new(NullSink) as Arc<dyn TelemetrySink>,
    };

    logging::init(&cli.logs, config.node_id.clone(), Arc::clone(&telemetry))?;

    warn!(
        "using in-memory ledger/transport stand-ins; this is a demo configuration, not a production deployment"
    );

    let signer = LocalSigner::from_env().unwrap_or_else(|err| {
        warn!(%err, "no signing keys found in CONDUIT_KEY_* environment variables");
        LocalSigner::new()
    });

    let deps = OrchestratorDeps {
        ledger_store: Arc::new(MemoryLedger::new()),
        signing_backend: Box::new(signer),
        transport: Arc::new(MemoryTransport::new()),
        decode: Arc::new(decode_packet),
        telemetry: Arc::clone(&telemetry),
        chat_alert_channels: vec![],
        email_alert_channels: vec![],
    };

    let orchestrator = Orchestrator::new(config, deps).map_err(|err| eyre::eyre!(err))?;
    orchestrator.start().await.map_err(|err| eyre::eyre!(err))?;

    info!("conduit node ready, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for the shutdown signal")?;
    info!("shutdown signal received, draining...");

    orchestrator.shutdown().await;
    if let Some(emitter) = telemetry_emitter {
        emitter.shutdown().await;
    }

    Ok(())
}

/// Demo-only packet encoding: UTF-8 `<destination>|<amount>`, amount
/// defaulting to zero if absent. The packet binary encoding is explicitly
/// out of scope; a real deployment supplies its own
/// `DecodeFn` matching its actual wire format.
fn decode_packet(data: Vec<u8>) -> ConduitResult<DecodedPacket> {
    let text = String::from_utf8_lossy(&data);
    let mut parts = text.splitn(2, '|');
    let destination = parts.next().unwrap_or_default().to_string();
    let amount: Amount = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok(DecodedPacket {
        destination,
        amount,
        expires_at: None,
    })
}
