use async_trait::async_trait;

use crate::error::KeyError;

/// Which curve/algorithm a key id belongs to, determined by substring match
/// on the id or explicit configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyType {
    /// ECDSA over secp256k1.
    Evm,
    /// Ed25519.
    Xrp,
}

impl KeyType {
    /// Infer the key type from an id by substring match.
    pub fn infer(key_id: &str) -> Option<Self> {
        let lower = key_id.to_ascii_lowercase();
        if lower.contains("xrp") {
            Some(Self::Xrp)
        } else if lower.contains("evm") {
            Some(Self::Evm)
        } else {
            None
        }
    }
}

/// A raw signature produced by a backend. Never carries key material.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Signature(pub Vec<u8>);

/// A public key, in whatever encoding the backend natively returns it
/// (raw or uncompressed for the remote KMS backends).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PublicKey {
    pub key_type: KeyType,
    pub bytes: Vec<u8>,
}

/// Uniform signing/verification contract implemented by every key backend:
/// the process-local signer, the remote KMS variants, and the HSM backend.
///
/// Private keys never cross this boundary — only signatures and public keys
/// do. [`crate::manager::KeyManager`] wraps every call with audit logging.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Human-readable backend name, used in audit events.
    fn backend_name(&self) -> &'static str;

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError>;

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError>;

    /// Create new key material and return the new key's id. Backends that
    /// require manual/out-of-band rotation return
    /// [`KeyError::ManualRotationRequired`].
    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError>;
}
