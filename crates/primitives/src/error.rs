use crate::{Amount, PeerId, TokenId};

/// Result alias used throughout the conduit workspace.
pub type ConduitResult<T> = Result<T, ConduitError>;

/// The error taxonomy shared across the connector.
///
/// This is not tied to any one subsystem: `PacketPipeline` maps every
/// terminal rejection onto one of these variants, and every subsystem error
/// type (`AccountingError`, `SettlementError`, `KeyError`, ...) converts into
/// this one at the boundary the orchestrator crosses.
#[derive(Debug, thiserror::Error)]
pub enum ConduitError {
    /// Admission was rejected by the rate limiter or circuit breaker.
    #[error("peer {peer} rate limited")]
    RateLimited { peer: PeerId },

    /// The peer is paused by the fraud detector.
    #[error("peer {peer} is paused: {reason}")]
    PeerPaused { peer: PeerId, reason: String },

    /// No route exists to the packet's destination.
    #[error("no route to destination")]
    NoRoute,

    /// Forwarding would exceed the effective credit limit.
    #[error("insufficient liquidity: peer {peer} token {token} would owe {would_owe}, limit {limit}")]
    InsufficientLiquidity {
        peer: PeerId,
        token: TokenId,
        would_owe: Amount,
        limit: Amount,
    },

    /// The packet's expiry elapsed before it could be forwarded.
    #[error("packet expired")]
    Expired,

    /// A downstream backend (ledger, KMS/HSM, transport) failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration failed validation; fatal at construction time.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The component is shutting down and rejected the request.
    #[error("shutting down")]
    Shutdown,

    /// Caller is not authenticated against the administrative channel.
    #[error("unauthorized")]
    Unauthorized,

    /// Caller authenticated with the wrong shared secret.
    #[error("forbidden")]
    Forbidden,

    /// An unrecoverable internal error with no more specific mapping.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures from an external collaborator: the ledger store, a signing
/// backend, or the peer transport. These are retried within the owning
/// component's policy (batch writers re-queue, alert notifiers back off);
/// only once a component gives up does it surface as `ConduitError::Backend`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("ledger store error: {0}")]
    Ledger(String),

    #[error("signing backend error: {0}")]
    Signing(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("channel closed")]
    ChannelClosed,
}
