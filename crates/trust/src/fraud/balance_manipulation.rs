use super::{Detection, FraudEvent, FraudRule, Severity};

/// Flags a balance update that goes negative, or whose delta doesn't match
/// the settlement amount that produced it.
#[derive(Default)]
pub struct BalanceManipulationRule;

impl BalanceManipulationRule {
    pub fn new() -> Self {
        Self
    }
}

impl FraudRule for BalanceManipulationRule {
    fn name(&self) -> &'static str {
        "BalanceManipulation"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn check(&self, event: &FraudEvent) -> Option<Detection> {
        let FraudEvent::BalanceUpdate {
            peer,
            previous_balance,
            new_balance,
            settlement_amount,
        } = event
        else {
            return None;
        };

        // Both balances are unsigned `Amount`s, so a negative resulting
        // balance shows up here as an underflow check instead.
        let expected_delta = *previous_balance as i128 - *settlement_amount as i128;
        let actual_delta = *new_balance as i128;

        if actual_delta < 0 || actual_delta != expected_delta {
            return Some(Detection {
                rule: self.name(),
                severity: self.severity(),
                peer: peer.clone(),
                details: Some(format!(
                    "expected balance {expected_delta} after settlement of {settlement_amount}, observed {new_balance}"
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
    fn flags_mismatched_delta() {
        let rule = BalanceManipulationRule::new();
        let event = FraudEvent::BalanceUpdate {
            peer: PeerId::from("peer-a"),
            previous_balance: 1000,
            new_balance: 950,
            settlement_amount: 100,
        };
        assert!(rule.check(&event).is_some());
    }

    #[test]
    fn allows_matching_delta() {
        let rule = BalanceManipulationRule::new();
        let event = FraudEvent::BalanceUpdate {
            peer: PeerId::from("peer-a"),
            previous_balance: 1000,
            new_balance: 900,
            settlement_amount: 100,
        };
        assert!(rule.check(&event).is_none());
    }
}
