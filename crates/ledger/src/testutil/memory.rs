use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use conduit_primitives::AccountId;

use crate::error::LedgerError;
use crate::store::{AccountSnapshot, LedgerAccount, LedgerStore, Transfer};

/// In-memory `LedgerStore` for tests, matching the credit-normal balance
/// convention `AccountManager` posts against: a transfer increases its
/// `credit_account_id`'s balance and decreases its `debit_account_id`'s, by
/// `amount`.
pub struct MemoryLedger {
    accounts: Mutex<HashMap<AccountId, LedgerAccount>>,
    balances: Mutex<HashMap<AccountId, i128>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_accounts_batch(
        &self,
        accounts: Vec<LedgerAccount>,
    ) -> Result<Vec<Result<(), LedgerError>>, LedgerError> {
        let mut store = self.accounts.lock().unwrap();
        let mut balances = self.balances.lock().unwrap();
        let mut results = Vec::with_capacity(accounts.len());
        for account in accounts {
            if store.contains_key(&account.id) {
                results.push(Err(LedgerError::AlreadyExists));
                continue;
            }
            balances.entry(account.id).or_insert(0);
            store.insert(account.id, account);
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn get_accounts_batch(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSnapshot>, LedgerError> {
        let balances = self.balances.lock().unwrap();
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let balance = balances.get(id).copied().unwrap_or(0);
            out.insert(
                *id,
                AccountSnapshot {
                    balance: balance.max(0) as u128,
                },
            );
        }
        Ok(out)
    }

    async fn create_transfers_batch(
        &self,
        transfers: Vec<Transfer>,
    ) -> Result<Vec<Result<(), LedgerError>>, LedgerError> {
        let mut balances = self.balances.lock().unwrap();
        let mut results = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            *balances.entry(transfer.credit_account_id).or_insert(0) += transfer.amount as i128;
            *balances.entry(transfer.debit_account_id).or_insert(0) -= transfer.amount as i128;
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn close(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}
