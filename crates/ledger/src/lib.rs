//! Double-entry account model, batched transfer writing, and settlement
//! monitoring for the conduit connector.

mod account_manager;
mod batch_writer;
mod error;
mod settlement_monitor;
mod store;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use account_manager::AccountManager;
pub use batch_writer::{BatchWriter, BatchWriterConfig};
pub use error::LedgerError;
pub use settlement_monitor::SettlementMonitor;
pub use store::{AccountSnapshot, LedgerAccount, LedgerStore, Transfer, TransferCode};
