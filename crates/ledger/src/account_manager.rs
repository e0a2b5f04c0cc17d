use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::warn;

use conduit_primitives::{
    AccountBalance, AccountKind, Amount, ConduitError, ConduitResult, CreditLimitConfig,
    PeerAccountPair, PeerId, TelemetryEvent, TelemetryEventKind, TelemetrySink, TokenId,
    TransferId, WireAmount,
};

use crate::batch_writer::BatchWriter;
use crate::error::LedgerError;
use crate::store::{LedgerAccount, LedgerStore, Transfer, TransferCode};

/// Double-entry account pairs, deterministic ids, credit-limit checks, and
/// packet/settlement transfer recording.
///
/// The account id cache is the hottest shared structure in the whole
/// connector, so lookups are a plain concurrent map read; the
/// slow path (first-touch account creation) is deduplicated across
/// concurrent callers via an in-flight `Notify` per `(peer, token)` — a
/// double-checked-lock shape adapted for an async ledger round-trip rather
/// than pure in-memory state.
pub struct AccountManager {
    node_id: String,
    store: Arc<dyn LedgerStore>,
    batch_writer: Option<Arc<BatchWriter>>,
    telemetry: Arc<dyn TelemetrySink>,
    ledger_number: u32,
    credit_limits: CreditLimitConfig,
    pairs: DashMap<(PeerId, TokenId), PeerAccountPair>,
    in_flight: DashMap<(PeerId, TokenId), Arc<Notify>>,
    transfer_counter: std::sync::atomic::AtomicU64,
}

impl AccountManager {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn LedgerStore>,
        batch_writer: Option<Arc<BatchWriter>>,
        telemetry: Arc<dyn TelemetrySink>,
        ledger_number: u32,
        credit_limits: CreditLimitConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            batch_writer,
            telemetry,
            ledger_number,
            credit_limits,
            pairs: DashMap::new(),
            in_flight: DashMap::new(),
            transfer_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Cache lookup or deterministic (re)generation. Never a ledger call.
    pub fn get_peer_account_pair(&self, peer: &PeerId, token: &TokenId) -> PeerAccountPair {
        if let Some(pair) = self.pairs.get(&(peer.clone(), token.clone())) {
            return *pair;
        }
        let pair = PeerAccountPair::derive(&self.node_id, peer, token);
        self.pairs.insert((peer.clone(), token.clone()), pair);
        pair
    }

    /// Create both ledger accounts for `(peer, token)` if they don't already
    /// exist, deduplicating concurrent callers so exactly one ledger batch
    /// is submitted.
    pub async fn create_peer_accounts(
        &self,
        peer: &PeerId,
        token: &TokenId,
    ) -> ConduitResult<PeerAccountPair> {
        let key = (peer.clone(), token.clone());
        let pair = PeerAccountPair::derive(&self.node_id, peer, token);

        if self.pairs.contains_key(&key) {
            return Ok(pair);
        }

        // Double-checked: if someone else is already creating this pair,
        // wait on their Notify instead of racing a second ledger batch.
        // `Entry` makes the "claim the slot or join the existing waiter"
        // step a single atomic operation on the shard lock.
        enum Slot {
            Owned(Arc<Notify>),
            Waiting(Arc<Notify>),
        }

        loop {
            let slot = match self.in_flight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(e) => Slot::Waiting(e.get().clone()),
                dashmap::mapref::entry::Entry::Vacant(e) => {
                    let notify = Arc::new(Notify::new());
                    e.insert(notify.clone());
                    Slot::Owned(notify)
                }
            };

            match slot {
                Slot::Owned(notify) => {
                    let result = self.do_create_peer_accounts(peer, token, pair).await;
                    self.in_flight.remove(&key);
                    notify.notify_waiters();
                    return result;
                }
                Slot::Waiting(notify) => {
                    notify.notified().await;
                    if let Some(cached) = self.pairs.get(&key) {
                        return Ok(*cached);
                    }
                    // The in-flight attempt failed; fall through and retry.
                }
            }
        }
    }

    async fn do_create_peer_accounts(
        &self,
        peer: &PeerId,
        token: &TokenId,
        pair: PeerAccountPair,
    ) -> ConduitResult<PeerAccountPair> {
        let mut user_data = Vec::with_capacity(peer.as_str().len() + token.as_str().len() + 2);
        user_data.extend_from_slice(peer.as_str().as_bytes());
        user_data.push(0);
        user_data.extend_from_slice(token.as_str().as_bytes());

        let accounts = vec![
            LedgerAccount {
                id: pair.debit_account_id,
                ledger: self.ledger_number,
                code: AccountKind::Debit as u16,
                user_data: user_data.clone(),
            },
            LedgerAccount {
                id: pair.credit_account_id,
                ledger: self.ledger_number,
                code: AccountKind::Credit as u16,
                user_data,
            },
        ];

        let results = self
            .store
            .create_accounts_batch(accounts)
            .await
            .map_err(map_ledger_err)?;

        // Idempotent: an "already exists" result is treated as success.
        for result in results {
            if let Err(LedgerError::AlreadyExists) | Ok(()) = result {
                continue;
            }
            if let Err(e) = result {
                return Err(map_ledger_err(e));
            }
        }

        self.pairs.insert((peer.clone(), token.clone()), pair);
        Ok(pair)
    }

    /// Batch-read both accounts; missing accounts read as 0.
    pub async fn get_account_balance(
        &self,
        peer: &PeerId,
        token: &TokenId,
    ) -> ConduitResult<AccountBalance> {
        let pair = self.get_peer_account_pair(peer, token);
        let ids = [pair.debit_account_id, pair.credit_account_id];
        let snapshots = self
            .store
            .get_accounts_batch(&ids)
            .await
            .map_err(map_ledger_err)?;

        let debit_balance = snapshots
            .get(&pair.debit_account_id)
            .map(|s| s.balance)
            .unwrap_or(0);
        let credit_balance = snapshots
            .get(&pair.credit_account_id)
            .map(|s| s.balance)
            .unwrap_or(0);

        Ok(AccountBalance {
            debit_balance,
            credit_balance,
        })
    }

    /// Fetch/compute the effective credit limit; violation if
    /// `debitBalance + amount > limit`.
    pub async fn check_credit_limit(
        &self,
        peer: &PeerId,
        token: &TokenId,
        amount: Amount,
    ) -> ConduitResult<()> {
        let Some(limit) = self.credit_limits.effective_limit(peer, token) else {
            return Ok(());
        };

        self.create_peer_accounts(peer, token).await?;
        let balance = self.get_account_balance(peer, token).await?;
        let would_owe = balance.debit_balance.saturating_add(amount);

        if would_owe > limit {
            return Err(ConduitError::InsufficientLiquidity {
                peer: peer.clone(),
                token: token.clone(),
                would_owe,
                limit,
            });
        }
        Ok(())
    }

    fn next_transfer_id(&self, peer: &PeerId, token: &TokenId) -> TransferId {
        let counter = self
            .transfer_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        TransferId::derive(&self.node_id, peer, token, counter)
    }

    /// Build two transfers and post them atomically; emit balance telemetry
    /// for both peers on success.
    pub async fn record_packet_transfers(
        &self,
        from_peer: &PeerId,
        to_peer: &PeerId,
        token: &TokenId,
        in_amount: Amount,
        out_amount: Amount,
    ) -> ConduitResult<()> {
        let from_pair = self.create_peer_accounts(from_peer, token).await?;
        let to_pair = self.create_peer_accounts(to_peer, token).await?;

        // Balances are credit-normal: a transfer increases its
        // `credit_account_id`'s balance and decreases its
        // `debit_account_id`'s, by `amount`. The incoming side increases
        // the from-peer's debit account (receivable); the outgoing side
        // increases the to-peer's credit account (payable), each against
        // its sibling in the same pair.
        let now = OffsetDateTime::now_utc();
        let transfers = vec![
            Transfer {
                id: self.next_transfer_id(from_peer, token),
                debit_account_id: from_pair.credit_account_id,
                credit_account_id: from_pair.debit_account_id,
                amount: in_amount,
                ledger: self.ledger_number,
                code: TransferCode::Packet,
                flags: 0,
                user_data: None,
                timeout: None,
                timestamp: now,
            },
            Transfer {
                id: self.next_transfer_id(to_peer, token),
                debit_account_id: to_pair.debit_account_id,
                credit_account_id: to_pair.credit_account_id,
                amount: out_amount,
                ledger: self.ledger_number,
                code: TransferCode::Packet,
                flags: 0,
                user_data: None,
                timeout: None,
                timestamp: now,
            },
        ];

        self.post_transfers(transfers).await?;

        for (peer, tok) in [(from_peer, token), (to_peer, token)] {
            self.emit_balance(peer, tok).await;
        }
        Ok(())
    }

    /// Construct a settlement transfer with a newly minted id and submit it,
    /// directly or through the batch writer depending on configuration.
    pub async fn record_settlement(
        &self,
        peer: &PeerId,
        token: &TokenId,
        amount: Amount,
    ) -> ConduitResult<()> {
        let pair = self.create_peer_accounts(peer, token).await?;
        let transfer = Transfer {
            id: self.next_transfer_id(peer, token),
            debit_account_id: pair.credit_account_id,
            credit_account_id: pair.debit_account_id,
            amount,
            ledger: self.ledger_number,
            code: TransferCode::Settlement,
            flags: 0,
            user_data: None,
            timeout: None,
            timestamp: OffsetDateTime::now_utc(),
        };

        self.post_transfers(vec![transfer]).await?;
        self.emit_balance(peer, token).await;

        self.telemetry.emit(TelemetryEvent::new(
            self.node_id.clone(),
            TelemetryEventKind::SettlementCompleted {
                peer: peer.clone(),
                token: token.clone(),
                amount: WireAmount(amount),
            },
        ));
        Ok(())
    }

    async fn post_transfers(&self, transfers: Vec<Transfer>) -> ConduitResult<()> {
        if let Some(writer) = &self.batch_writer {
            return writer.submit(transfers).await;
        }

        let results = self
            .store
            .create_transfers_batch(transfers)
            .await
            .map_err(map_ledger_err)?;

        for result in results {
            match result {
                Ok(()) | Err(LedgerError::AlreadyExists) => {}
                Err(e) => return Err(map_ledger_err(e)),
            }
        }
        Ok(())
    }

    async fn emit_balance(&self, peer: &PeerId, token: &TokenId) {
        match self.get_account_balance(peer, token).await {
            Ok(balance) => {
                self.telemetry.emit(TelemetryEvent::new(
                    self.node_id.clone(),
                    TelemetryEventKind::AccountBalance {
                        peer: peer.clone(),
                        token: token.clone(),
                        debit_balance: WireAmount(balance.debit_balance),
                        credit_balance: WireAmount(balance.credit_balance),
                        net_balance: balance.net_balance(),
                    },
                ));
            }
            Err(e) => warn!(%peer, %token, error = %e, "failed to read balance for telemetry"),
        }
    }
}

fn map_ledger_err(e: LedgerError) -> ConduitError {
    ConduitError::Backend(conduit_primitives::BackendError::Ledger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryLedger;
    use conduit_primitives::NullSink;

    fn manager() -> AccountManager {
        AccountManager::new(
            "node-1",
            Arc::new(MemoryLedger::new()),
            None,
            Arc::new(NullSink),
            0,
            CreditLimitConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_peer_accounts_is_idempotent() {
        let mgr = manager();
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");

        let first = mgr.create_peer_accounts(&peer, &token).await.unwrap();
        let second = mgr.create_peer_accounts(&peer, &token).await.unwrap();
        assert_eq!(first.debit_account_id, second.debit_account_id);
    }

    #[tokio::test]
    async fn concurrent_creation_is_deduplicated() {
        let mgr = Arc::new(manager());
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let mgr = mgr.clone();
            let peer = peer.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                mgr.create_peer_accounts(&peer, &token).await.unwrap()
            }));
        }
        let mut pairs = Vec::new();
        for h in handles {
            pairs.push(h.await.unwrap());
        }
        assert!(pairs.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn record_packet_transfers_updates_both_balances() {
        let mgr = manager();
        let from = PeerId::from("peer-a");
        let to = PeerId::from("peer-b");
        let token = TokenId::from("ILP");

        mgr.record_packet_transfers(&from, &to, &token, 1000, 990)
            .await
            .unwrap();

        let from_balance = mgr.get_account_balance(&from, &token).await.unwrap();
        assert_eq!(from_balance.debit_balance, 1000);

        let to_balance = mgr.get_account_balance(&to, &token).await.unwrap();
        assert_eq!(to_balance.credit_balance, 990);
    }

    #[tokio::test]
    async fn credit_limit_violation_is_reported() {
        let mut limits = CreditLimitConfig::default();
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        limits.per_peer.insert(peer.clone(), 500);

        let mgr = AccountManager::new(
            "node-1",
            Arc::new(MemoryLedger::new()),
            None,
            Arc::new(NullSink),
            0,
            limits,
        );

        let to = PeerId::from("peer-other");
        mgr.record_packet_transfers(&peer, &to, &token, 600, 100)
            .await
            .ok();

        let err = mgr.check_credit_limit(&peer, &token, 1).await;
        assert!(matches!(err, Err(ConduitError::InsufficientLiquidity { .. })));
    }

    #[tokio::test]
    async fn settlement_emits_completed_event() {
        let mgr = manager();
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        mgr.record_settlement(&peer, &token, 500).await.unwrap();
    }
}
