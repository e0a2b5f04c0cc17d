use dashmap::DashMap;

use conduit_primitives::{Amount, PeerId};

use super::{Detection, FraudEvent, FraudRule, Severity};

/// Flags a claim on `(peer, channel)` whose amount is strictly less than the
/// last recorded claim on that channel — a replayed or stale claim.
#[derive(Default)]
pub struct DoubleSpendDetectionRule {
    last_claim: DashMap<(PeerId, String), Amount>,
}

impl DoubleSpendDetectionRule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FraudRule for DoubleSpendDetectionRule {
    fn name(&self) -> &'static str {
        "DoubleSpendDetection"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn check(&self, event: &FraudEvent) -> Option<Detection> {
        let FraudEvent::ChannelClaim {
            peer,
            channel_id,
            claim_amount,
        } = event
        else {
            return None;
        };

        let key = (peer.clone(), channel_id.clone());
        let mut detection = None;
        match self.last_claim.get(&key) {
            Some(last) if *claim_amount < *last => {
                detection = Some(Detection {
                    rule: self.name(),
                    severity: self.severity(),
                    peer: peer.clone(),
                    details: Some(format!(
                        "claim {claim_amount} on channel {channel_id} is less than last recorded claim {}",
                        *last
                    )),
                });
            }
            _ => {}
        }
        self.last_claim.insert(key, *claim_amount);
        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decreasing_claim() {
        let rule = DoubleSpendDetectionRule::new();
        let peer = PeerId::from("peer-a");
        let claim = |amount| FraudEvent::ChannelClaim {
            peer: peer.clone(),
            channel_id: "chan-1".into(),
            claim_amount: amount,
        };

        assert!(rule.check(&claim(100)).is_none());
        assert!(rule.check(&claim(200)).is_none());
        assert!(rule.check(&claim(150)).is_some());
    }

    #[test]
    fn ignores_unrelated_events() {
        let rule = DoubleSpendDetectionRule::new();
        let event = FraudEvent::PacketObserved {
            peer: PeerId::from("peer-a"),
        };
        assert!(rule.check(&event).is_none());
    }
}
