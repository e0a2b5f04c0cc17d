use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use time::OffsetDateTime;
use tracing::info;

use conduit_primitives::{PeerId, TelemetryEvent, TelemetryEventKind, TelemetrySink};

use crate::fraud::{Detection, FraudEvent, FraudRule, Severity};
use crate::reputation::ReputationTracker;

/// Why a peer is currently paused.
#[derive(Debug, Clone)]
pub struct PauseRecord {
    pub reason: String,
    pub rule_violated: &'static str,
    pub severity: Severity,
    pub since: OffsetDateTime,
}

/// The outcome of analyzing one event: every rule's detections, and whether
/// the peer crossed the auto-pause floor as a result.
#[derive(Debug, Clone)]
pub struct FraudVerdict {
    pub detections: Vec<Detection>,
    pub auto_paused: bool,
}

/// Event router: feeds events to every [`FraudRule`], folds detections into
/// [`ReputationTracker`], and tracks paused peers.
pub struct FraudDetector {
    rules: Vec<Box<dyn FraudRule>>,
    reputation: Arc<ReputationTracker>,
    paused: RwLock<HashMap<PeerId, PauseRecord>>,
    node_id: String,
    telemetry: Arc<dyn TelemetrySink>,
}

impl FraudDetector {
    pub fn new(
        rules: Vec<Box<dyn FraudRule>>,
        reputation: Arc<ReputationTracker>,
        node_id: impl Into<String>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            rules,
            reputation,
            paused: RwLock::new(HashMap::new()),
            node_id: node_id.into(),
            telemetry,
        }
    }

    /// Run every rule against `event`; every rule always runs (evaluation
    /// order is not observable). For each detection: update reputation,
    /// emit `FRAUD_DETECTED`, and auto-pause the peer if reputation crosses
    /// the floor.
    pub fn analyze_event(&self, event: &FraudEvent) -> FraudVerdict {
        let now = OffsetDateTime::now_utc();
        let mut detections = Vec::new();
        for rule in &self.rules {
            if let Some(detection) = rule.check(event) {
                detections.push(detection);
            }
        }

        let mut auto_paused = false;
        for detection in &detections {
            self.reputation.update_reputation_score(
                &detection.peer,
                detection.rule,
                detection.severity,
                now,
            );

            self.telemetry.emit(TelemetryEvent::new(
                self.node_id.clone(),
                TelemetryEventKind::FraudDetected {
                    peer: detection.peer.clone(),
                    rule: detection.rule.to_string(),
                    severity: detection.severity.as_str().to_string(),
                    details: detection.details.clone(),
                },
            ));
            metrics::counter!("fraud_detector.detections_total", "rule" => detection.rule)
                .increment(1);

            if self.reputation.should_auto_pause(&detection.peer)
                && !self.is_paused(&detection.peer)
            {
                self.pause_peer(
                    detection.peer.clone(),
                    format!("reputation below floor after {}", detection.rule),
                    detection.rule,
                    detection.severity,
                );
                auto_paused = true;
            }
        }

        FraudVerdict {
            detections,
            auto_paused,
        }
    }

    pub fn pause_peer(
        &self,
        peer: PeerId,
        reason: String,
        rule_violated: &'static str,
        severity: Severity,
    ) {
        info!(%peer, reason = %reason, "pausing peer");
        let since = OffsetDateTime::now_utc();
        self.paused.write().insert(
            peer.clone(),
            PauseRecord {
                reason: reason.clone(),
                rule_violated,
                severity,
                since,
            },
        );
        self.telemetry.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::PeerPaused { peer, reason },
        ));
    }

    pub fn resume_peer(&self, peer: &PeerId) {
        if self.paused.write().remove(peer).is_some() {
            info!(%peer, "resuming peer");
            self.telemetry.emit(TelemetryEvent::new(
                self.node_id.clone(),
                TelemetryEventKind::PeerResumed { peer: peer.clone() },
            ));
        }
    }

    pub fn is_paused(&self, peer: &PeerId) -> bool {
        self.paused.read().contains_key(peer)
    }

    pub fn pause_reason(&self, peer: &PeerId) -> Option<PauseRecord> {
        self.paused.read().get(peer).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::DoubleSpendDetectionRule;
    use conduit_primitives::NullSink;

    fn detector() -> FraudDetector {
        FraudDetector::new(
            vec![Box::new(DoubleSpendDetectionRule::new())],
            Arc::new(ReputationTracker::with_params(100.0, 50.0, 0.0)),
            "node-1",
            Arc::new(NullSink),
        )
    }

    #[test]
    fn detection_updates_reputation_but_does_not_yet_auto_pause() {
        // claims [100, 200, 150] on one channel; the
        // third triggers DoubleSpendDetectionRule, reputation drops 100 -> 75
        // (critical penalty 25), and the peer is not paused yet (75 >= the
        // default 50 auto-pause floor).
        let detector = detector();
        let peer = PeerId::from("peer-a");
        let claim = |amount| FraudEvent::ChannelClaim {
            peer: peer.clone(),
            channel_id: "c1".into(),
            claim_amount: amount,
        };

        assert!(!detector.analyze_event(&claim(100)).detections.iter().any(|_| true));
        assert!(!detector.analyze_event(&claim(200)).detections.iter().any(|_| true));
        let verdict = detector.analyze_event(&claim(150));
        assert_eq!(verdict.detections.len(), 1);
        assert!(!verdict.auto_paused);
        assert!(!detector.is_paused(&peer));
    }

    #[test]
    fn repeated_detections_cross_auto_pause_floor() {
        let detector = detector();
        let peer = PeerId::from("peer-a");
        let claim = |amount| FraudEvent::ChannelClaim {
            peer: peer.clone(),
            channel_id: "c1".into(),
            claim_amount: amount,
        };

        detector.analyze_event(&claim(100));
        detector.analyze_event(&claim(200));
        detector.analyze_event(&claim(150)); // detected: 100 -> 75
        detector.analyze_event(&claim(300));
        detector.analyze_event(&claim(250)); // detected: 75 -> 50
        let verdict = detector.analyze_event(&claim(100)); // detected: 50 -> 25, crosses the 50 floor
        assert!(verdict.auto_paused);
        assert!(detector.is_paused(&peer));
    }

    #[test]
    fn resume_clears_pause_state() {
        let detector = detector();
        let peer = PeerId::from("peer-a");
        detector.pause_peer(peer.clone(), "manual".into(), "admin", Severity::Low);
        assert!(detector.is_paused(&peer));
        detector.resume_peer(&peer);
        assert!(!detector.is_paused(&peer));
    }
}
