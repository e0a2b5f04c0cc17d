use conduit_primitives::Amount;

use super::{Detection, FraudEvent, FraudRule, Severity};

const DEFAULT_MAX_SETTLEMENT_AMOUNT: Amount = 1_000_000_000;

/// Flags a settlement whose amount exceeds `max_settlement_amount`.
pub struct UnusualSettlementAmountRule {
    max_settlement_amount: Amount,
}

impl UnusualSettlementAmountRule {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_SETTLEMENT_AMOUNT)
    }

    pub fn with_limit(max_settlement_amount: Amount) -> Self {
        Self {
            max_settlement_amount,
        }
    }
}

impl Default for UnusualSettlementAmountRule {
    fn default() -> Self {
        Self::new()
    }
}

impl FraudRule for UnusualSettlementAmountRule {
    fn name(&self) -> &'static str {
        "UnusualSettlementAmount"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn check(&self, event: &FraudEvent) -> Option<Detection> {
        let FraudEvent::SettlementObserved { peer, amount } = event else {
            return None;
        };

        if *amount > self.max_settlement_amount {
            return Some(Detection {
                rule: self.name(),
                severity: self.severity(),
                peer: peer.clone(),
                details: Some(format!(
                    "settlement of {amount} exceeds limit {}",
                    self.max_settlement_amount
                )),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_primitives::PeerId;

    #[test]
    fn flags_above_limit() {
        let rule = UnusualSettlementAmountRule::with_limit(100);
        let event = FraudEvent::SettlementObserved {
            peer: PeerId::from("peer-a"),
            amount: 101,
        };
        assert!(rule.check(&event).is_some());
    }

    #[test]
    fn allows_at_limit() {
        let rule = UnusualSettlementAmountRule::with_limit(100);
        let event = FraudEvent::SettlementObserved {
            peer: PeerId::from("peer-a"),
            amount: 100,
        };
        assert!(rule.check(&event).is_none());
    }
}
