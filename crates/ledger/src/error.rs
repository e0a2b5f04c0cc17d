/// Failures from the external `LedgerStore`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Duplicate account/transfer submission. Treated as idempotent success
    /// by `AccountManager` rather than propagated.
    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("operation timed out")]
    Timeout,

    #[error("ledger store error: {0}")]
    Other(String),
}
