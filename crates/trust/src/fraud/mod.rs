//! Pluggable fraud rules.
//!
//! Each rule is a predicate over a stream of [`FraudEvent`]s, keyed by
//! whatever private state it needs (peer, channel, ...). Rules never talk to
//! each other; [`crate::FraudDetector`] runs every rule for every event and
//! aggregates the detections.

mod balance_manipulation;
mod double_spend;
mod rapid_channel_closure;
mod traffic_spike;
mod unusual_settlement;

pub use balance_manipulation::BalanceManipulationRule;
pub use double_spend::DoubleSpendDetectionRule;
pub use rapid_channel_closure::RapidChannelClosureRule;
pub use traffic_spike::SuddenTrafficSpikeRule;
pub use unusual_settlement::UnusualSettlementAmountRule;

use conduit_primitives::{Amount, PeerId};

/// Severity of a fraud rule, used both for reputation penalty weighting and
/// [`crate::AlertNotifier`] channel routing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Reputation points subtracted on a detection of this severity.
    pub fn penalty(self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 5,
            Severity::High => 10,
            Severity::Critical => 25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One observable occurrence that a fraud rule may react to. Rules ignore
/// variants they don't care about.
#[derive(Debug, Clone)]
pub enum FraudEvent {
    ChannelClaim {
        peer: PeerId,
        channel_id: String,
        claim_amount: Amount,
    },
    BalanceUpdate {
        peer: PeerId,
        previous_balance: Amount,
        new_balance: Amount,
        settlement_amount: Amount,
    },
    ChannelClosed {
        peer: PeerId,
        channel_id: String,
    },
    SettlementObserved {
        peer: PeerId,
        amount: Amount,
    },
    PacketObserved {
        peer: PeerId,
    },
}

impl FraudEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            FraudEvent::ChannelClaim { peer, .. }
            | FraudEvent::BalanceUpdate { peer, .. }
            | FraudEvent::ChannelClosed { peer, .. }
            | FraudEvent::SettlementObserved { peer, .. }
            | FraudEvent::PacketObserved { peer } => peer,
        }
    }
}

/// A detection reported by a rule.
#[derive(Debug, Clone)]
pub struct Detection {
    pub rule: &'static str,
    pub severity: Severity,
    pub peer: PeerId,
    pub details: Option<String>,
}

/// A pluggable fraud predicate.
///
/// Implementors hold their own private keyed state and must be internally
/// synchronized — `FraudDetector` calls `check` from a single task but the
/// trait object is shared behind an `Arc` so it can be swapped or inspected
/// independently in tests.
pub trait FraudRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn severity(&self) -> Severity;
    fn check(&self, event: &FraudEvent) -> Option<Detection>;
}

/// The five concrete fraud rules, with their default
/// parameters. `FraudDetector::new` takes a `Vec<Box<dyn FraudRule>>`
/// directly so deployments can swap or extend this set.
pub fn default_rules() -> Vec<Box<dyn FraudRule>> {
    vec![
        Box::new(DoubleSpendDetectionRule::new()),
        Box::new(BalanceManipulationRule::new()),
        Box::new(RapidChannelClosureRule::new()),
        Box::new(UnusualSettlementAmountRule::new()),
        Box::new(SuddenTrafficSpikeRule::new()),
    ]
}
