use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use conduit_primitives::{ConduitResult, PeerId};

use crate::transport::PeerTransport;

/// An in-memory [`PeerTransport`] that just records what was sent to each
/// peer, mirroring `conduit_ledger::testutil::MemoryLedger`'s shape for
/// pipeline integration tests.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<HashMap<PeerId, Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().get(peer).cloned().unwrap_or_default()
    }

    pub fn total_sent(&self) -> usize {
        self.sent.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send(&self, to_peer: &PeerId, bytes: Vec<u8>) -> ConduitResult<()> {
        self.sent
            .lock()
            .unwrap()
            .entry(to_peer.clone())
            .or_default()
            .push(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_bytes_per_peer() {
        let transport = MemoryTransport::new();
        let peer = PeerId::from("peer-b");
        transport.send(&peer, b"hello".to_vec()).await.unwrap();
        transport.send(&peer, b"world".to_vec()).await.unwrap();

        assert_eq!(transport.sent_to(&peer), vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(transport.total_sent(), 2);
    }
}
