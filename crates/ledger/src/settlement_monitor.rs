use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use conduit_primitives::{
    Amount, PeerId, SettlementState, SettlementThreshold, TelemetryEvent, TelemetryEventKind,
    TelemetrySink, TokenId, WireAmount,
};

use crate::account_manager::AccountManager;

/// Periodic balance sweep, threshold detection, and the per-(peer, token)
/// settlement state machine.
pub struct SettlementMonitor {
    node_id: String,
    accounts: Arc<AccountManager>,
    telemetry: Arc<dyn TelemetrySink>,
    thresholds: SettlementThreshold,
    states: RwLock<HashMap<(PeerId, TokenId), SettlementState>>,
}

impl SettlementMonitor {
    pub fn new(
        node_id: impl Into<String>,
        accounts: Arc<AccountManager>,
        telemetry: Arc<dyn TelemetrySink>,
        thresholds: SettlementThreshold,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            accounts,
            telemetry,
            thresholds,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Register a (peer, token) pair at `IDLE`, as happens on first touch.
    pub fn register_pair(&self, peer: &PeerId, token: &TokenId) {
        self.states
            .write()
            .entry((peer.clone(), token.clone()))
            .or_insert(SettlementState::Idle);
    }

    pub fn state(&self, peer: &PeerId, token: &TokenId) -> SettlementState {
        self.states
            .read()
            .get(&(peer.clone(), token.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Called by the orchestrator around `AccountManager::record_settlement`.
    pub fn mark_settlement_in_progress(&self, peer: &PeerId, token: &TokenId) {
        self.states
            .write()
            .insert((peer.clone(), token.clone()), SettlementState::SettlementInProgress);
    }

    pub fn mark_settlement_completed(&self, peer: &PeerId, token: &TokenId) {
        self.states
            .write()
            .insert((peer.clone(), token.clone()), SettlementState::Idle);
    }

    /// One sweep over every registered pair. Run
    /// once immediately by `start`, then on every `pollingInterval` tick.
    /// Returns the pairs for which `SETTLEMENT_REQUIRED` fired this sweep,
    /// so the orchestrator can drive `AccountManager::record_settlement`.
    pub async fn check_all(&self) -> Vec<(PeerId, TokenId, Amount)> {
        let pairs: Vec<(PeerId, TokenId)> = self.states.read().keys().cloned().collect();
        let mut due = Vec::new();

        for (peer, token) in pairs {
            match self.check_pair(&peer, &token).await {
                Ok(Some(amount)) => due.push((peer, token, amount)),
                Ok(None) => {}
                Err(e) => warn!(%peer, %token, error = %e, "settlement check failed, continuing"),
            }
        }
        due
    }

    async fn check_pair(
        &self,
        peer: &PeerId,
        token: &TokenId,
    ) -> Result<Option<Amount>, conduit_primitives::ConduitError> {
        let Some(threshold) = self.thresholds.effective_limit(peer, token) else {
            return Ok(None);
        };

        let balance = self.accounts.get_account_balance(peer, token).await?;
        let current = balance.credit_balance;
        let state = self.state(peer, token);

        match state {
            SettlementState::Idle if current > threshold => {
                let exceeds_by = current - threshold;
                self.states
                    .write()
                    .insert((peer.clone(), token.clone()), SettlementState::SettlementPending);

                self.telemetry.emit(TelemetryEvent::new(
                    self.node_id.clone(),
                    TelemetryEventKind::SettlementRequired {
                        peer: peer.clone(),
                        token: token.clone(),
                        current_balance: WireAmount(current),
                        threshold: WireAmount(threshold),
                        exceeds_by: WireAmount(exceeds_by),
                    },
                ));
                Ok(Some(current))
            }
            SettlementState::SettlementPending if current <= threshold => {
                // Balance recovered on its own before settlement executed.
                self.states
                    .write()
                    .insert((peer.clone(), token.clone()), SettlementState::Idle);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Background polling loop; intended to run in its own task, stopped by
    /// dropping the returned handle or via cooperative cancellation at the
    /// orchestrator's shutdown boundary.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut on_due: impl FnMut(PeerId, TokenId, Amount) + Send,
    ) {
        for (peer, token, amount) in self.check_all().await {
            on_due(peer, token, amount);
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (peer, token, amount) in self.check_all().await {
                on_due(peer, token, amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryLedger;

    fn thresholds_with(peer: &PeerId, amount: Amount) -> SettlementThreshold {
        let mut t = SettlementThreshold::default();
        t.per_peer.insert(peer.clone(), amount);
        t
    }

    fn accounts() -> Arc<AccountManager> {
        Arc::new(AccountManager::new(
            "node-1",
            Arc::new(MemoryLedger::new()),
            None,
            Arc::new(conduit_primitives::NullSink),
            0,
            conduit_primitives::CreditLimitConfig::default(),
        ))
    }

    #[tokio::test]
    async fn crossing_threshold_transitions_to_pending() {
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        let accounts = accounts();
        accounts
            .record_packet_transfers(&PeerId::from("other"), &peer, &token, 10, 2000)
            .await
            .unwrap();

        let monitor = SettlementMonitor::new(
            "node-1",
            accounts,
            Arc::new(conduit_primitives::NullSink),
            thresholds_with(&peer, 1000),
        );
        monitor.register_pair(&peer, &token);

        let due = monitor.check_all().await;
        assert_eq!(due.len(), 1);
        assert_eq!(monitor.state(&peer, &token), SettlementState::SettlementPending);
    }

    #[tokio::test]
    async fn equality_does_not_trigger() {
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        let accounts = accounts();
        accounts
            .record_packet_transfers(&PeerId::from("other"), &peer, &token, 10, 1000)
            .await
            .unwrap();

        let monitor = SettlementMonitor::new(
            "node-1",
            accounts,
            Arc::new(conduit_primitives::NullSink),
            thresholds_with(&peer, 1000),
        );
        monitor.register_pair(&peer, &token);

        let due = monitor.check_all().await;
        assert!(due.is_empty());
        assert_eq!(monitor.state(&peer, &token), SettlementState::Idle);
    }

    #[tokio::test]
    async fn pending_recovers_to_idle_when_balance_drops() {
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        let accounts = accounts();

        let monitor = SettlementMonitor::new(
            "node-1",
            accounts.clone(),
            Arc::new(conduit_primitives::NullSink),
            thresholds_with(&peer, 1000),
        );
        monitor.register_pair(&peer, &token);
        monitor
            .states
            .write()
            .insert((peer.clone(), token.clone()), SettlementState::SettlementPending);

        // No packet transfers posted: balance is 0, below threshold.
        let due = monitor.check_all().await;
        assert!(due.is_empty());
        assert_eq!(monitor.state(&peer, &token), SettlementState::Idle);
    }
}
