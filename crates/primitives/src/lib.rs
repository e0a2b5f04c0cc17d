//! Shared types for the conduit payment connector.
//!
//! This crate has no dependency on any other conduit crate; every other
//! workspace member depends on it. It defines identifiers, the error
//! taxonomy, the account/settlement data model, and the telemetry event
//! union that the rest of the workspace threads through.

mod account;
mod error;
mod ids;
mod packet;
mod telemetry;

pub use account::{
    AccountBalance, AccountKind, CreditLimitConfig, PeerAccountPair, SettlementState,
    SettlementThreshold, TieredLimit,
};
pub use error::{BackendError, ConduitError, ConduitResult};
pub use ids::{AccountId, CorrelationId, PeerId, TokenId, TransferId};
pub use packet::{PacketHeader, PeerToken, RejectionReason, RequestType};
pub use telemetry::{
    LogLevel, NullSink, TelemetryEvent, TelemetryEventKind, TelemetrySink, WireAmount,
};

/// Monetary amounts are arbitrary-precision non-negative integers.
///
/// `u128` comfortably exceeds the precision of any real-world asset scale
/// (the largest circulating token supplies fit in under 100 bits) while
/// staying a plain machine integer, which keeps the hot path allocation-free.
pub type Amount = u128;

/// Net balances can be negative (a peer can be owed money), so they use a
/// signed, wide type rather than a plain `i64` — ILP balances routinely
/// exceed 64 bits in aggregate.
pub type NetAmount = i128;
