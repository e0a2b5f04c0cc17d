use std::fmt;
use std::sync::Arc;

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

/// Peer identity. Cheap to clone (reference-counted string).
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Asset/token identity (e.g. the ILP asset code + scale, opaque here).
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Arc<str>);

impl TokenId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A deterministic, 128-bit ledger account id.
///
/// Derived as `keccak256(DOMAIN_PREFIX || nodeId || peerId || tokenId ||
/// accountKind)[..16]`. Never constructed from time or random material, so
/// two invocations on any machine produce the same id for the same inputs.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(#[serde(with = "hex_bytes_16")] pub [u8; 16]);

const ACCOUNT_DOMAIN_PREFIX: &[u8] = b"conduit-account-v1:";

impl AccountId {
    /// Derive the deterministic account id for `(node, peer, token, kind)`.
    pub fn derive(node_id: &str, peer_id: &PeerId, token_id: &TokenId, kind: u8) -> Self {
        let mut buf = Vec::with_capacity(
            ACCOUNT_DOMAIN_PREFIX.len() + node_id.len() + peer_id.as_str().len() + token_id.as_str().len() + 1,
        );
        buf.extend_from_slice(ACCOUNT_DOMAIN_PREFIX);
        buf.extend_from_slice(node_id.as_bytes());
        buf.push(0); // domain separator between fields
        buf.extend_from_slice(peer_id.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(token_id.as_str().as_bytes());
        buf.push(0);
        buf.push(kind);

        let digest = keccak256(&buf);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", hex::encode(self.0))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

mod hex_bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], s: S) -> Result<S::Ok, S::Error> {
        hex::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

/// Globally-unique transfer id, submitted to the ledger store.
///
/// Derived from `(nodeId, peerId, tokenId, monotonic counter)` rather than
/// `now_ms * 10^6 + rand()`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(#[serde(with = "hex_bytes_16")] pub [u8; 16]);

impl TransferId {
    pub fn derive(node_id: &str, peer_id: &PeerId, token_id: &TokenId, counter: u64) -> Self {
        let mut buf = Vec::with_capacity(32 + node_id.len() + peer_id.as_str().len() + token_id.as_str().len());
        buf.extend_from_slice(b"conduit-transfer-v1:");
        buf.extend_from_slice(node_id.as_bytes());
        buf.push(0);
        buf.extend_from_slice(peer_id.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(token_id.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(&counter.to_be_bytes());

        let digest = keccak256(&buf);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        Self(id)
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", hex::encode(self.0))
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Per-packet correlation id: `pkt_` + 16 lowercase hex chars derived from 8
/// cryptographically random bytes.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("pkt_{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_is_deterministic() {
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        let a = AccountId::derive("node-1", &peer, &token, 0);
        let b = AccountId::derive("node-1", &peer, &token, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn account_id_distinguishes_kind() {
        let peer = PeerId::from("peer-a");
        let token = TokenId::from("ILP");
        let debit = AccountId::derive("node-1", &peer, &token, 0);
        let credit = AccountId::derive("node-1", &peer, &token, 1);
        assert_ne!(debit, credit);
    }

    #[test]
    fn account_id_distinguishes_peer_and_token() {
        let token = TokenId::from("ILP");
        let a = AccountId::derive("node-1", &PeerId::from("peer-a"), &token, 0);
        let b = AccountId::derive("node-1", &PeerId::from("peer-b"), &token, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_id_format() {
        let id = CorrelationId::generate();
        assert!(id.as_str().starts_with("pkt_"));
        assert_eq!(id.as_str().len(), "pkt_".len() + 16);
    }
}
