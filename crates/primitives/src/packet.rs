use time::OffsetDateTime;

use crate::{Amount, PeerId};

/// The typed header the core already knows about a packet; the remainder of
/// the packet is an opaque byte buffer.
#[derive(Debug, Clone)]
pub struct PacketHeader {
    /// Destination ILP-style address (e.g. `g.b.alice`).
    pub destination: String,
    /// The amount carried by the packet, in the token the peer link uses.
    pub amount: Amount,
    /// Absolute expiry; packets expiring before forwarding are rejected
    /// locally with [`RejectionReason::Expired`].
    pub expires_at: OffsetDateTime,
}

/// Terminal rejection reasons for `PacketPipeline::process_packet`.
#[derive(Debug, Clone)]
pub enum RejectionReason {
    RateLimited,
    PeerPaused { reason: String },
    NoRoute,
    InsufficientLiquidity { would_owe: Amount, limit: Amount },
    Expired,
    Internal { detail: String },
}

impl RejectionReason {
    pub fn peer_facing_code(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::PeerPaused { .. } => "peer_paused",
            Self::NoRoute => "no_route",
            Self::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Self::Expired => "expired",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Used by admission control logging/metrics to tag the kind of request.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestType {
    IlpPacket,
    Settlement,
    Admin,
}

/// A recipient of a pause/unblock etc. mentions which peer the action
/// concerns; kept here since several crates need the pair shape.
#[derive(Debug, Clone)]
pub struct PeerToken {
    pub peer: PeerId,
}
