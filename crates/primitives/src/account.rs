use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, NetAmount, PeerId, TokenId};

/// Which side of a peer account pair an [`AccountId`] denotes.
///
/// `Debit` = the amount the peer owes this node. `Credit` = the amount this
/// node owes the peer. Packed into the derivation as a single byte so the
/// two ids are distinguishable but still deterministic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccountKind {
    Debit = 0,
    Credit = 1,
}

/// The (debit, credit) account duo representing the obligation relationship
/// with one peer in one token. Created on first use and cached for process
/// lifetime.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PeerAccountPair {
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
}

impl PeerAccountPair {
    pub fn derive(node_id: &str, peer_id: &PeerId, token_id: &TokenId) -> Self {
        Self {
            debit_account_id: AccountId::derive(node_id, peer_id, token_id, AccountKind::Debit as u8),
            credit_account_id: AccountId::derive(node_id, peer_id, token_id, AccountKind::Credit as u8),
        }
    }
}

/// A balance snapshot for one peer account pair.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AccountBalance {
    pub debit_balance: Amount,
    pub credit_balance: Amount,
}

impl AccountBalance {
    /// Net balance = credit − debit.
    pub fn net_balance(&self) -> NetAmount {
        self.credit_balance as NetAmount - self.debit_balance as NetAmount
    }
}

/// A three-level configuration hierarchy: per-(peer,token) → per-peer →
/// default, each optionally capped by a global ceiling. Used for both
/// credit limits and settlement thresholds.
#[derive(Debug, Clone, Default)]
pub struct TieredLimit {
    pub per_peer_token: HashMap<(PeerId, TokenId), Amount>,
    pub per_peer: HashMap<PeerId, Amount>,
    pub default: Option<Amount>,
    pub global_ceiling: Option<Amount>,
}

impl TieredLimit {
    /// Resolve the effective limit for `(peer, token)`, first match wins,
    /// always capped by the global ceiling if configured. `None` = unlimited.
    pub fn effective_limit(&self, peer: &PeerId, token: &TokenId) -> Option<Amount> {
        let tier = self
            .per_peer_token
            .get(&(peer.clone(), token.clone()))
            .copied()
            .or_else(|| self.per_peer.get(peer).copied())
            .or(self.default);

        match (tier, self.global_ceiling) {
            (Some(v), Some(ceiling)) => Some(v.min(ceiling)),
            (Some(v), None) => Some(v),
            (None, Some(ceiling)) => Some(ceiling),
            (None, None) => None,
        }
    }
}

/// Credit limit configuration: a ceiling on the debit-side balance.
pub type CreditLimitConfig = TieredLimit;

/// Settlement threshold configuration: the credit-balance magnitude at which
/// a settlement trigger fires.
pub type SettlementThreshold = TieredLimit;

/// Per (peer, token) settlement state machine.
///
/// ```text
/// IDLE --threshold crossed--> SETTLEMENT_PENDING
/// SETTLEMENT_PENDING --execution starts--> SETTLEMENT_IN_PROGRESS
/// SETTLEMENT_IN_PROGRESS --success--> IDLE
/// SETTLEMENT_PENDING --balance recovers--> IDLE
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SettlementState {
    Idle,
    SettlementPending,
    SettlementInProgress,
}

impl Default for SettlementState {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiered_limit_first_match_wins() {
        let mut t = TieredLimit::default();
        let peer = PeerId::from("a");
        let token = TokenId::from("ILP");
        t.default = Some(1000);
        t.per_peer.insert(peer.clone(), 500);
        t.per_peer_token.insert((peer.clone(), token.clone()), 100);

        assert_eq!(t.effective_limit(&peer, &token), Some(100));

        t.per_peer_token.remove(&(peer.clone(), token.clone()));
        assert_eq!(t.effective_limit(&peer, &token), Some(500));

        t.per_peer.remove(&peer);
        assert_eq!(t.effective_limit(&peer, &token), Some(1000));
    }

    #[test]
    fn global_ceiling_always_caps() {
        let mut t = TieredLimit::default();
        let peer = PeerId::from("a");
        let token = TokenId::from("ILP");
        t.per_peer.insert(peer.clone(), 10_000);
        t.global_ceiling = Some(1_000);
        assert_eq!(t.effective_limit(&peer, &token), Some(1_000));
    }

    #[test]
    fn unlimited_when_nothing_configured() {
        let t = TieredLimit::default();
        assert_eq!(t.effective_limit(&PeerId::from("a"), &TokenId::from("ILP")), None);
    }

    #[test]
    fn net_balance_is_credit_minus_debit() {
        let b = AccountBalance {
            debit_balance: 300,
            credit_balance: 1000,
        };
        assert_eq!(b.net_balance(), 700);
    }
}
