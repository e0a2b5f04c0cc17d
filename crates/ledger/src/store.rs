use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

use conduit_primitives::{AccountId, Amount, TransferId};

use crate::error::LedgerError;

/// What a transfer represents. Packet transfers move value
/// between a from-peer's debit account and a to-peer's credit account;
/// settlement transfers net a single peer's debit/credit pair against each
/// other.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransferCode {
    Packet,
    Settlement,
}

/// An account as created in the external ledger. `user_data` packs peer/
/// token/account-kind metadata the way TigerBeetle-style ledgers pack
/// `user_data_64`/`user_data_128` fields.
#[derive(Debug, Clone)]
pub struct LedgerAccount {
    pub id: AccountId,
    pub ledger: u32,
    pub code: u16,
    pub user_data: Vec<u8>,
}

/// `(id, debitAccountId, creditAccountId, amount, ledger, code, flags,
/// optional user-data, optional timeout, timestamp)`.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub amount: Amount,
    pub ledger: u32,
    pub code: TransferCode,
    pub flags: u16,
    pub user_data: Option<Vec<u8>>,
    pub timeout: Option<std::time::Duration>,
    pub timestamp: OffsetDateTime,
}

/// A balance snapshot for a single ledger account.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AccountSnapshot {
    pub balance: Amount,
}

/// The external double-entry account/transfer store. Batch
/// operations are atomic all-or-nothing; `create_accounts_batch` and
/// `create_transfers_batch` return one result per input entry so callers
/// can distinguish "already exists" (idempotent success) from a hard
/// failure without collapsing per-item diagnostics.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_accounts_batch(
        &self,
        accounts: Vec<LedgerAccount>,
    ) -> Result<Vec<Result<(), LedgerError>>, LedgerError>;

    async fn get_accounts_batch(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSnapshot>, LedgerError>;

    async fn create_transfers_batch(
        &self,
        transfers: Vec<Transfer>,
    ) -> Result<Vec<Result<(), LedgerError>>, LedgerError>;

    async fn close(&self) -> Result<(), LedgerError>;
}
