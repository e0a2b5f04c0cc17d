use std::sync::Arc;

use conduit_ledger::AccountManager;
use conduit_primitives::{
    ConduitError, CorrelationId, PeerId, RejectionReason, RequestType, TelemetryEvent,
    TelemetryEventKind, TelemetrySink, TokenId, WireAmount,
};
use conduit_trust::fraud::FraudEvent;
use conduit_trust::{AlertNotifier, FraudDetector, RateLimiter};

use crate::routing_table::RoutingTable;
use crate::transport::PeerTransport;
use crate::worker_pool::{DecodeFn, WorkerPool};

/// Construction-time knobs for [`PacketPipeline`].
pub struct PipelineConfig {
    pub worker_count: usize,
    pub max_queue_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: crate::worker_pool::DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// The single path every inbound packet travels: admission, fraud check,
/// decode, routing, credit check, ledger recording, forwarding.
///
/// Each collaborator owns its own concern and is consulted in a fixed
/// order; `PacketPipeline` itself holds no mutable state beyond what it
/// needs to wire them together — a thin coordinator over components that
/// are each independently testable.
pub struct PacketPipeline {
    node_id: String,
    rate_limiter: Arc<RateLimiter>,
    fraud_detector: Arc<FraudDetector>,
    alert_notifier: Arc<AlertNotifier>,
    routing_table: Arc<RoutingTable>,
    accounts: Arc<AccountManager>,
    transport: Arc<dyn PeerTransport>,
    telemetry: Arc<dyn TelemetrySink>,
    workers: Arc<WorkerPool>,
}

impl PacketPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        fraud_detector: Arc<FraudDetector>,
        alert_notifier: Arc<AlertNotifier>,
        routing_table: Arc<RoutingTable>,
        accounts: Arc<AccountManager>,
        transport: Arc<dyn PeerTransport>,
        telemetry: Arc<dyn TelemetrySink>,
        config: PipelineConfig,
        decode: DecodeFn,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            rate_limiter,
            fraud_detector,
            alert_notifier,
            routing_table,
            accounts,
            transport,
            telemetry,
            workers: WorkerPool::spawn(config.worker_count, config.max_queue_size, decode),
        }
    }

    pub fn processed_count(&self) -> usize {
        self.workers.processed_count()
    }

    pub fn shutdown(&self) {
        self.workers.shutdown();
    }

    /// Run `packet_bytes` from `from_peer` through admission, routing,
    /// accounting and forwarding.
    ///
    /// Every terminal failure maps onto a [`RejectionReason`] the caller can
    /// relay back to the sending peer without leaking internal detail.
    pub async fn process_packet(
        &self,
        from_peer: &PeerId,
        token: &TokenId,
        packet_bytes: Vec<u8>,
    ) -> Result<(), RejectionReason> {
        let correlation_id = CorrelationId::generate();

        // 1. Admission control.
        if !self.rate_limiter.check_limit(from_peer, RequestType::IlpPacket) {
            return Err(RejectionReason::RateLimited);
        }

        // 2. Fraud pause check.
        if let Some(record) = self.fraud_detector.pause_reason(from_peer) {
            return Err(RejectionReason::PeerPaused {
                reason: record.reason,
            });
        }

        // 2b. Feed the sudden-traffic-spike rule; never gates the packet
        // itself, only folds into reputation/alerting. Detections, including any auto-pause they
        // trigger, are handled entirely inside `analyze_event` and its
        // companion alert dispatch below — the pipeline never re-checks
        // `is_paused` for the packet already in flight.
        self.observe_fraud_event(FraudEvent::PacketObserved {
            peer: from_peer.clone(),
        });

        // 3. Decode/validate off the hot task via the worker pool.
        let decoded = self
            .workers
            .execute(packet_bytes.clone())
            .await
            .map_err(to_rejection)?;

        self.telemetry.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::PacketReceived {
                from_peer: from_peer.clone(),
                correlation_id: correlation_id.clone(),
                amount: WireAmount(decoded.amount),
            },
        ));

        // 3b. Local expiry check, ahead of routing/accounting.
        if let Some(expires_at) = decoded.expires_at {
            if expires_at <= time::OffsetDateTime::now_utc() {
                return Err(RejectionReason::Expired);
            }
        }

        // 4. Longest-prefix-match routing.
        let next_hop = self.routing_table.longest_prefix_match(&decoded.destination);

        self.telemetry.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::RouteLookup {
                destination: decoded.destination.clone(),
                selected_peer: next_hop.clone(),
            },
        ));

        let next_hop = next_hop.ok_or(RejectionReason::NoRoute)?;

        // 5. Credit limit check against the inbound peer's receivable.
        self.accounts
            .check_credit_limit(from_peer, token, decoded.amount)
            .await
            .map_err(to_rejection)?;

        // 6. Record the packet transfer pair before forwarding so the
        // ledger reflects the obligation even if the forward itself fails.
        self.accounts
            .record_packet_transfers(from_peer, &next_hop, token, decoded.amount, decoded.amount)
            .await
            .map_err(to_rejection)?;

        // 7. Forward to the next hop.
        self.transport
            .send(&next_hop, packet_bytes)
            .await
            .map_err(to_rejection)?;

        self.telemetry.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::PacketSent {
                to_peer: next_hop,
                correlation_id,
                amount: WireAmount(decoded.amount),
            },
        ));

        Ok(())
    }

    /// Run `event` through the fraud detector and fan any detections out to
    /// the alert notifier, off the hot path. This mirrors the "notifies"
    /// half of the orchestrator's fraud-detected handling, scoped to the
    /// packet-observed path since that's the only fraud signal the pipeline
    /// itself produces.
    fn observe_fraud_event(&self, event: FraudEvent) {
        let verdict = self.fraud_detector.analyze_event(&event);
        if verdict.detections.is_empty() {
            return;
        }
        let alert_notifier = self.alert_notifier.clone();
        tokio::spawn(async move {
            for detection in verdict.detections {
                let subject = format!("fraud rule {} triggered for peer {}", detection.rule, detection.peer);
                let body = detection
                    .details
                    .unwrap_or_else(|| format!("severity={}", detection.severity.as_str()));
                alert_notifier
                    .notify(detection.severity, &subject, &body)
                    .await;
            }
        });
    }
}

fn to_rejection(err: ConduitError) -> RejectionReason {
    match err {
        ConduitError::RateLimited { .. } => RejectionReason::RateLimited,
        ConduitError::PeerPaused { reason, .. } => RejectionReason::PeerPaused { reason },
        ConduitError::NoRoute => RejectionReason::NoRoute,
        ConduitError::InsufficientLiquidity {
            would_owe, limit, ..
        } => RejectionReason::InsufficientLiquidity { would_owe, limit },
        ConduitError::Expired => RejectionReason::Expired,
        other => RejectionReason::Internal {
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_ledger::testutil::MemoryLedger;
    use conduit_ledger::AccountManager;
    use conduit_primitives::{CreditLimitConfig, NullSink};
    use conduit_trust::{FraudDetector, RateLimiter, RateLimiterConfig};
    use std::time::Duration;

    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<(PeerId, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl PeerTransport for RecordingTransport {
        async fn send(
            &self,
            to_peer: &PeerId,
            bytes: Vec<u8>,
        ) -> conduit_primitives::ConduitResult<()> {
            self.sent.lock().unwrap().push((to_peer.clone(), bytes));
            Ok(())
        }
    }

    fn echo_decode() -> DecodeFn {
        Arc::new(|data: Vec<u8>| {
            Ok(crate::worker_pool::DecodedPacket {
                destination: String::from_utf8_lossy(&data).into_owned(),
                amount: 100,
                expires_at: None,
            })
        })
    }

    fn make_pipeline(transport: Arc<RecordingTransport>) -> PacketPipeline {
        let rate_limiter = Arc::new(
            RateLimiter::new(RateLimiterConfig {
                default_capacity: 1000.0,
                default_refill_rate: 1000.0,
                violation_threshold: 5,
                window: Duration::from_secs(60),
                block_duration: Duration::from_secs(60),
                adaptive_enabled: false,
            })
            .unwrap(),
        );
        let fraud_detector = Arc::new(FraudDetector::new(
            conduit_trust::fraud::default_rules(),
            Arc::new(conduit_trust::ReputationTracker::new()),
            "node-a",
            Arc::new(NullSink),
        ));
        let routing_table = Arc::new(RoutingTable::new());
        routing_table.insert("g.b.", PeerId::from("peer-b"), 0);

        let store = Arc::new(MemoryLedger::new());
        let accounts = Arc::new(AccountManager::new(
            "node-a",
            store,
            None,
            Arc::new(NullSink),
            1,
            CreditLimitConfig::default(),
        ));

        PacketPipeline::new(
            "node-a",
            rate_limiter,
            fraud_detector,
            Arc::new(AlertNotifier::new(vec![], vec![])),
            routing_table,
            accounts,
            transport,
            Arc::new(NullSink),
            PipelineConfig {
                worker_count: 2,
                max_queue_size: 16,
            },
            echo_decode(),
        )
    }

    #[tokio::test]
    async fn forwards_a_routed_packet() {
        let transport = RecordingTransport::new();
        let pipeline = make_pipeline(transport.clone());

        let result = pipeline
            .process_packet(
                &PeerId::from("peer-a"),
                &TokenId::from("usd"),
                b"g.b.alice".to_vec(),
            )
            .await;

        assert!(result.is_ok(), "{result:?}");
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unroutable_destination_is_rejected() {
        let transport = RecordingTransport::new();
        let pipeline = make_pipeline(transport);

        let result = pipeline
            .process_packet(
                &PeerId::from("peer-a"),
                &TokenId::from("usd"),
                b"h.unknown.alice".to_vec(),
            )
            .await;

        assert!(matches!(result, Err(RejectionReason::NoRoute)));
    }

    #[tokio::test]
    async fn paused_peer_is_rejected_before_decode() {
        let transport = RecordingTransport::new();
        let pipeline = make_pipeline(transport);
        let peer = PeerId::from("peer-a");
        pipeline
            .fraud_detector
            .pause_peer(peer.clone(), "manual test pause".into(), "test", conduit_trust::fraud::Severity::High);

        let result = pipeline
            .process_packet(&peer, &TokenId::from("usd"), b"g.b.alice".to_vec())
            .await;

        assert!(matches!(result, Err(RejectionReason::PeerPaused { .. })));
        assert_eq!(pipeline.processed_count(), 0, "pause short-circuits before decode");
    }

    #[tokio::test]
    async fn expired_packet_is_rejected_before_routing() {
        let transport = RecordingTransport::new();
        let rate_limiter = Arc::new(
            RateLimiter::new(RateLimiterConfig {
                default_capacity: 1000.0,
                default_refill_rate: 1000.0,
                violation_threshold: 5,
                window: Duration::from_secs(60),
                block_duration: Duration::from_secs(60),
                adaptive_enabled: false,
            })
            .unwrap(),
        );
        let fraud_detector = Arc::new(FraudDetector::new(
            conduit_trust::fraud::default_rules(),
            Arc::new(conduit_trust::ReputationTracker::new()),
            "node-a",
            Arc::new(NullSink),
        ));
        let routing_table = Arc::new(RoutingTable::new());
        routing_table.insert("g.b.", PeerId::from("peer-b"), 0);
        let store = Arc::new(MemoryLedger::new());
        let accounts = Arc::new(AccountManager::new(
            "node-a",
            store,
            None,
            Arc::new(NullSink),
            1,
            CreditLimitConfig::default(),
        ));

        let expired_decode: DecodeFn = Arc::new(|data: Vec<u8>| {
            Ok(crate::worker_pool::DecodedPacket {
                destination: String::from_utf8_lossy(&data).into_owned(),
                amount: 100,
                expires_at: Some(time::OffsetDateTime::now_utc() - Duration::from_secs(1)),
            })
        });

        let pipeline = PacketPipeline::new(
            "node-a",
            rate_limiter,
            fraud_detector,
            Arc::new(AlertNotifier::new(vec![], vec![])),
            routing_table,
            accounts,
            transport.clone(),
            Arc::new(NullSink),
            PipelineConfig {
                worker_count: 2,
                max_queue_size: 16,
            },
            expired_decode,
        );

        let result = pipeline
            .process_packet(
                &PeerId::from("peer-a"),
                &TokenId::from("usd"),
                b"g.b.alice".to_vec(),
            )
            .await;

        assert!(matches!(result, Err(RejectionReason::Expired)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
