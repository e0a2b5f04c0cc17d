//! Lifecycle owner: builds every component in a fixed order, wires the
//! settlement/fraud event handlers that would otherwise need a pub-sub bus,
//! and drains everything in reverse on shutdown.
//!
//! Construction order is fixed, with one resequencing: the
//! telemetry emitter is connected by the caller *before* `Orchestrator::new`
//! runs, not mid-construction, so it can be handed to the global `tracing`
//! subscriber (via `TelemetryLogLayer`) before the first log line is
//! emitted. There is no real dependency edge that mandates the literal
//! listed order here — see `DESIGN.md`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::Server;
use tracing::{error, info, warn};

use conduit_keys::{KeyManager, KeyRotationConfig, KeyRotationManager, SigningBackend};
use conduit_ledger::{AccountManager, BatchWriter, LedgerStore, SettlementMonitor};
use conduit_metrics::{install_recorder, MetricsServer};
use conduit_pipeline::{DecodeFn, PacketPipeline, PeerTransport, RoutingTable};
use conduit_primitives::{PeerId, TelemetryEvent, TelemetryEventKind, TelemetrySink, TokenId};
use conduit_trust::fraud::{default_rules, FraudEvent};
use conduit_trust::{AlertChannel, AlertNotifier, FraudDetector, RateLimiter, ReputationTracker};

use crate::admin::{AdminServiceImpl, BearerAuthInterceptor};
use crate::config::NodeConfig;
use crate::proto::admin_service_server::AdminServiceServer;
use crate::proto::FILE_DESCRIPTOR_SET;

/// External collaborators the orchestrator does not construct itself —
/// named only by trait contract, so the caller (`bin/conduit`
/// in production, a test harness otherwise) chooses the concrete
/// implementation.
pub struct OrchestratorDeps {
    pub ledger_store: Arc<dyn LedgerStore>,
    pub signing_backend: Box<dyn SigningBackend>,
    pub transport: Arc<dyn PeerTransport>,
    pub decode: DecodeFn,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub chat_alert_channels: Vec<Box<dyn AlertChannel>>,
    pub email_alert_channels: Vec<Box<dyn AlertChannel>>,
}

/// Owns the whole running connector: the account manager, settlement
/// monitor, rate limiter, fraud detector, telemetry emitter, routing
/// table, and worker pool, the admin gRPC surface, and the metrics server.
pub struct Orchestrator {
    config: NodeConfig,
    telemetry: Arc<dyn TelemetrySink>,
    ledger_store: Arc<dyn LedgerStore>,
    key_manager: Arc<KeyManager>,
    key_rotation: Arc<KeyRotationManager>,
    accounts: Arc<AccountManager>,
    batch_writer: Option<Arc<BatchWriter>>,
    settlement_monitor: Arc<SettlementMonitor>,
    rate_limiter: Arc<RateLimiter>,
    fraud_detector: Arc<FraudDetector>,
    alert_notifier: Arc<AlertNotifier>,
    pipeline: Arc<PacketPipeline>,
    admin_shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    metrics_server: Option<Arc<MetricsServer>>,
    settlement_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    rotation_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    admin_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build every component in construction order; nothing here spawns a
    /// background task yet (that's `start`'s job), so `new` can never half
    /// start a connector that later fails in `start`.
    pub fn new(config: NodeConfig, deps: OrchestratorDeps) -> Result<Self, String> {
        let OrchestratorDeps {
            ledger_store,
            signing_backend,
            transport,
            decode,
            telemetry,
            chat_alert_channels,
            email_alert_channels,
        } = deps;

        let key_manager = Arc::new(KeyManager::new(signing_backend, config.node_id.clone()));

        let rotation_config: KeyRotationConfig = config.key_rotation.build();
        let key_rotation = Arc::new(
            KeyRotationManager::new(rotation_config, Arc::clone(&key_manager))
                .map_err(|e| format!("key rotation config: {e}"))?,
        );

        let batch_writer = if config.batch_writer.enabled {
            Some(BatchWriter::spawn(
                Arc::clone(&ledger_store),
                config.batch_writer.build(),
            ))
        } else {
            None
        };

        let accounts = Arc::new(AccountManager::new(
            config.node_id.clone(),
            Arc::clone(&ledger_store),
            batch_writer.clone(),
            Arc::clone(&telemetry),
            config.ledger_number,
            config.credit_limits.build(),
        ));

        let settlement_monitor = Arc::new(SettlementMonitor::new(
            config.node_id.clone(),
            Arc::clone(&accounts),
            Arc::clone(&telemetry),
            config.settlement.thresholds.build(),
        ));

        let rate_limiter = Arc::new(
            RateLimiter::new(config.rate_limiter.build()).map_err(|e| format!("rate limiter config: {e}"))?,
        );

        let fraud_detector = Arc::new(FraudDetector::new(
            default_rules(),
            Arc::new(ReputationTracker::new()),
            config.node_id.clone(),
            Arc::clone(&telemetry),
        ));

        let alert_notifier = Arc::new(AlertNotifier::new(chat_alert_channels, email_alert_channels));

        let routing_table = Arc::new(RoutingTable::new());

        let pipeline = Arc::new(PacketPipeline::new(
            config.node_id.clone(),
            Arc::clone(&rate_limiter),
            Arc::clone(&fraud_detector),
            Arc::clone(&alert_notifier),
            routing_table,
            Arc::clone(&accounts),
            transport,
            Arc::clone(&telemetry),
            config.pipeline.build(),
            decode,
        ));

        let metrics_server = if config.metrics.enabled {
            let recorder = install_recorder(&config.metrics.prefix);
            recorder.spawn_upkeep(Duration::from_secs(config.metrics.upkeep_interval_secs));
            let addr: SocketAddr = config
                .metrics
                .bind_addr
                .parse()
                .map_err(|e| format!("metrics.bind_addr: {e}"))?;
            Some(Arc::new(MetricsServer::new(addr, recorder.handle().clone())))
        } else {
            None
        };

        Ok(Self {
            config,
            telemetry,
            ledger_store,
            key_manager,
            key_rotation,
            accounts,
            batch_writer,
            settlement_monitor,
            rate_limiter,
            fraud_detector,
            alert_notifier,
            pipeline,
            admin_shutdown: Mutex::new(None),
            metrics_server,
            settlement_task: Mutex::new(None),
            rotation_task: Mutex::new(None),
            admin_task: Mutex::new(None),
        })
    }

    pub fn pipeline(&self) -> &Arc<PacketPipeline> {
        &self.pipeline
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    /// Start every background task: the settlement poller, the key-rotation
    /// housekeeping ticker, the admin gRPC surface, and the metrics server.
    /// Each is independently optional via configuration; `new` already
    /// validated their addresses, so no failure here should be a
    /// configuration mistake.
    pub async fn start(&self) -> Result<(), String> {
        info!(node_id = %self.config.node_id, "starting conduit orchestrator");
        self.telemetry.emit(TelemetryEvent::new(
            self.config.node_id.clone(),
            TelemetryEventKind::NodeStatus { status: "starting".into() },
        ));

        self.spawn_settlement_poller().await;
        self.spawn_rotation_ticker().await;

        if self.config.admin.enabled {
            self.start_admin_server().await?;
        }

        if let Some(metrics_server) = &self.metrics_server {
            metrics_server.start().await.map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    /// Wires the settlement monitor's `SETTLEMENT_REQUIRED` signal to
    /// `AccountManager::record_settlement` and back to the monitor's state
    /// reset: the monitor polls the account manager, detects a threshold
    /// crossing, and the orchestrator drives the settlement through the
    /// batch writer before resetting the monitor's state for that pair.
    ///
    /// `SettlementMonitor::run`'s `on_due` callback is synchronous, so each
    /// due `(peer, token, amount)` is handled on its own spawned task rather
    /// than blocking the poll loop on the ledger round-trip.
    async fn spawn_settlement_poller(&self) {
        let monitor = Arc::clone(&self.settlement_monitor);
        let accounts = Arc::clone(&self.accounts);
        let fraud_detector = Arc::clone(&self.fraud_detector);
        let interval = Duration::from_secs(self.config.settlement.polling_interval_secs);

        let handle = tokio::spawn(async move {
            monitor
                .clone()
                .run(interval, move |peer: PeerId, token: TokenId, amount| {
                    let monitor = Arc::clone(&monitor);
                    let accounts = Arc::clone(&accounts);
                    let fraud_detector = Arc::clone(&fraud_detector);
                    tokio::spawn(async move {
                        monitor.mark_settlement_in_progress(&peer, &token);
                        match accounts.record_settlement(&peer, &token, amount).await {
                            Ok(()) => {
                                let verdict = fraud_detector.analyze_event(&FraudEvent::SettlementObserved {
                                    peer: peer.clone(),
                                    amount,
                                });
                                if !verdict.detections.is_empty() {
                                    warn!(%peer, detections = verdict.detections.len(), "fraud rule triggered by settlement");
                                }
                            }
                            Err(err) => {
                                error!(%peer, %token, %err, "automatic settlement failed");
                            }
                        }
                        monitor.mark_settlement_completed(&peer, &token);
                    });
                })
                .await;
        });
        *self.settlement_task.lock().await = Some(handle);
    }

    /// The key rotation manager's periodic housekeeping: age out overlap windows whose grace
    /// period has elapsed and log which keys are due for a
    /// rotation-reminder notification. Actual rotation stays
    /// admin-triggered via the `RotateKey` RPC — there is no registry of
    /// "last rotated at" to decide automatically which key is due, so
    /// fully automatic execution is out of scope (see `DESIGN.md`).
    async fn spawn_rotation_ticker(&self) {
        if !self.config.key_rotation.enabled {
            return;
        }
        let key_rotation = Arc::clone(&self.key_rotation);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let now = time::OffsetDateTime::now_utc();
                key_rotation.cleanup_expired_overlaps(now);
                let due = key_rotation.keys_due_for_notification(now);
                if !due.is_empty() {
                    warn!(keys = ?due, "keys due for rotation notification");
                }
            }
        });
        *self.rotation_task.lock().await = Some(handle);
    }

    async fn start_admin_server(&self) -> Result<(), String> {
        let addr: SocketAddr = self
            .config
            .admin
            .bind_addr
            .parse()
            .map_err(|e| format!("admin.bind_addr: {e}"))?;

        let admin_service = AdminServiceImpl::new(
            Arc::clone(&self.rate_limiter),
            Arc::clone(&self.fraud_detector),
            Arc::clone(&self.accounts),
            Arc::clone(&self.settlement_monitor),
            Arc::clone(&self.key_rotation),
        );

        let interceptor = BearerAuthInterceptor::new(self.config.admin.shared_secret.clone());
        let service = AdminServiceServer::with_interceptor(admin_service, interceptor);

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| format!("admin reflection service: {e}"))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        *self.admin_shutdown.lock().await = Some(shutdown_tx);

        info!(%addr, "admin gRPC surface listening");

        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(service)
                .add_service(reflection)
                .serve_with_shutdown(addr, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!(%err, "admin gRPC server exited with an error");
            }
        });
        *self.admin_task.lock().await = Some(handle);

        Ok(())
    }

    /// Reverse drain order: stop accepting new work, stop
    /// the settlement monitor, close the pipeline, drain the worker pool,
    /// flush the batch writer, flush and close the telemetry emitter, close
    /// the ledger client. Races the whole sequence against
    /// `shutdown_timeout_secs`; on timeout, escalates to hard termination
    /// after logging, per §10 item 1.
    pub async fn shutdown(&self) {
        let deadline = Duration::from_secs(self.config.shutdown_timeout_secs);
        match tokio::time::timeout(deadline, self.drain()).await {
            Ok(()) => info!("conduit orchestrator shut down cleanly"),
            Err(_) => {
                error!(?deadline, "shutdown did not complete within the configured bound, forcing exit");
                std::process::exit(1);
            }
        }
    }

    async fn drain(&self) {
        self.telemetry.emit(TelemetryEvent::new(
            self.config.node_id.clone(),
            TelemetryEventKind::NodeStatus { status: "stopping".into() },
        ));

        if let Some(handle) = self.settlement_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.rotation_task.lock().await.take() {
            handle.abort();
        }
        if let Some(tx) = self.admin_shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.admin_task.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(metrics_server) = &self.metrics_server {
            metrics_server.shutdown();
        }

        self.pipeline.shutdown();

        if let Some(batch_writer) = &self.batch_writer {
            batch_writer.shutdown().await;
        }

        // `TelemetrySink` is a narrow, synchronous emit-only trait (so
        // `conduit-primitives` stays free of a `conduit-telemetry`
        // dependency) and has no `shutdown`/`flush` of its own. Flushing
        // and closing the concrete `TelemetryEmitter` is the caller's job:
        // `bin/conduit` holds the `Arc<TelemetryEmitter>` directly and
        // calls its `shutdown` after this method returns.
        if let Err(err) = self.ledger_store.close().await {
            warn!(%err, "ledger store close reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use conduit_keys::LocalSigner;
    use conduit_ledger::testutil::MemoryLedger;
    use conduit_pipeline::testutil::MemoryTransport;
    use conduit_primitives::NullSink;

    use super::*;
    use crate::config::NodeConfig;

    const TEST_EVM_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn deps() -> OrchestratorDeps {
        let signer = LocalSigner::new().with_evm_key("evm-1", TEST_EVM_KEY).unwrap();
        OrchestratorDeps {
            ledger_store: Arc::new(MemoryLedger::new()),
            signing_backend: Box::new(signer),
            transport: Arc::new(MemoryTransport::new()),
            decode: Arc::new(|data: Vec<u8>| {
                Ok(conduit_pipeline::DecodedPacket {
                    destination: String::from_utf8_lossy(&data).into_owned(),
                    amount: 0,
                    expires_at: None,
                })
            }),
            telemetry: Arc::new(NullSink),
            chat_alert_channels: vec![],
            email_alert_channels: vec![],
        }
    }

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly_with_every_optional_surface_disabled() {
        let config = NodeConfig::default();
        let orchestrator = Orchestrator::new(config, deps()).unwrap();
        orchestrator.start().await.unwrap();
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn admin_surface_starts_and_is_reachable_for_shutdown() {
        let mut config = NodeConfig::default();
        config.admin.enabled = true;
        config.admin.shared_secret = "s3cret".into();
        config.admin.bind_addr = "127.0.0.1:0".into();
        config.validate().unwrap();

        let orchestrator = Orchestrator::new(config, deps()).unwrap();
        orchestrator.start().await.unwrap();
        orchestrator.shutdown().await;
    }
}
