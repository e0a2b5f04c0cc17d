use async_trait::async_trait;

use conduit_primitives::{ConduitResult, PeerId};

/// Bidirectional framed messages to/from each peer. The pipeline only ever calls `send`; the
/// `onPacket` half of the contract is the caller driving
/// `PacketPipeline::process_packet` from its own inbound loop, so it isn't
/// modeled as a callback here.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, to_peer: &PeerId, bytes: Vec<u8>) -> ConduitResult<()>;
}
