use std::collections::HashMap;
use std::str::FromStr;

use alloy_signer::Signer as AlloySigner;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use ed25519_dalek::{Signer as Ed25519Signer, SigningKey as Ed25519SigningKey};

use crate::backend::{KeyType, PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

enum LocalKey {
    Evm(PrivateKeySigner),
    Xrp(Box<Ed25519SigningKey>),
}

/// Process-local key backend: private keys are loaded once at startup from
/// the environment and held in memory for the life of the process.
/// `rotate_key` is not supported here — rotating a local key is an operator
/// action (replace the environment variable and restart), so it returns
/// [`KeyError::ManualRotationRequired`].
pub struct LocalSigner {
    keys: HashMap<String, LocalKey>,
}

impl LocalSigner {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Load an `evm` key (secp256k1) from a hex-encoded private key.
    pub fn with_evm_key(mut self, key_id: impl Into<String>, hex_private_key: &str) -> Result<Self, KeyError> {
        let signer = PrivateKeySigner::from_str(hex_private_key)
            .map_err(|e| KeyError::OperationFailed(format!("invalid evm private key: {e}")))?;
        self.keys.insert(key_id.into(), LocalKey::Evm(signer));
        Ok(self)
    }

    /// Load an `xrp` key (Ed25519) from a hex-encoded 32-byte seed.
    pub fn with_xrp_key(mut self, key_id: impl Into<String>, hex_seed: &str) -> Result<Self, KeyError> {
        let seed_bytes =
            hex::decode(hex_seed).map_err(|e| KeyError::OperationFailed(format!("invalid xrp seed hex: {e}")))?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| KeyError::OperationFailed("xrp seed must be 32 bytes".into()))?;
        let signing_key = Ed25519SigningKey::from_bytes(&seed);
        self.keys
            .insert(key_id.into(), LocalKey::Xrp(Box::new(signing_key)));
        Ok(self)
    }

    /// Load every `CONDUIT_KEY_<ID>` environment variable whose value is a
    /// hex-encoded key, inferring the curve from the id.
    pub fn from_env() -> Result<Self, KeyError> {
        const PREFIX: &str = "CONDUIT_KEY_";
        let mut signer = Self::new();
        for (name, value) in std::env::vars() {
            let Some(key_id) = name.strip_prefix(PREFIX) else {
                continue;
            };
            let key_id = key_id.to_ascii_lowercase();
            match KeyType::infer(&key_id) {
                Some(KeyType::Evm) => signer = signer.with_evm_key(key_id, &value)?,
                Some(KeyType::Xrp) => signer = signer.with_xrp_key(key_id, &value)?,
                None => {
                    tracing::warn!(%key_id, "could not infer key type from env var name, skipping");
                }
            }
        }
        Ok(signer)
    }
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SigningBackend for LocalSigner {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        let key = self.keys.get(key_id).ok_or_else(|| KeyError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        match key {
            LocalKey::Evm(signer) => {
                let sig = signer
                    .sign_message(message)
                    .await
                    .map_err(|e| KeyError::OperationFailed(e.to_string()))?;
                Ok(Signature(sig.as_bytes().to_vec()))
            }
            LocalKey::Xrp(signing_key) => {
                let sig = signing_key.sign(message);
                Ok(Signature(sig.to_bytes().to_vec()))
            }
        }
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        let key = self.keys.get(key_id).ok_or_else(|| KeyError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        match key {
            LocalKey::Evm(signer) => Ok(PublicKey {
                key_type: KeyType::Evm,
                bytes: signer.address().to_vec(),
            }),
            LocalKey::Xrp(signing_key) => Ok(PublicKey {
                key_type: KeyType::Xrp,
                bytes: signing_key.verifying_key().to_bytes().to_vec(),
            }),
        }
    }

    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError> {
        Err(KeyError::ManualRotationRequired {
            key_id: key_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_EVM_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const TEST_XRP_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[tokio::test]
    async fn signs_with_evm_backend() {
        let signer = LocalSigner::new().with_evm_key("evm-1", TEST_EVM_KEY).unwrap();
        let sig = signer.sign("evm-1", b"hello").await.unwrap();
        assert!(!sig.0.is_empty());
        let pubkey = signer.get_public_key("evm-1").await.unwrap();
        assert_eq!(pubkey.key_type, KeyType::Evm);
    }

    #[tokio::test]
    async fn signs_with_xrp_backend() {
        // only the first 32 hex bytes of TEST_XRP_SEED are used as the seed
        let seed_hex = &TEST_XRP_SEED[..64];
        let signer = LocalSigner::new().with_xrp_key("xrp-1", seed_hex).unwrap();
        let sig = signer.sign("xrp-1", b"hello").await.unwrap();
        assert_eq!(sig.0.len(), 64);
        let pubkey = signer.get_public_key("xrp-1").await.unwrap();
        assert_eq!(pubkey.key_type, KeyType::Xrp);
    }

    #[tokio::test]
    async fn unknown_key_id_is_not_found() {
        let signer = LocalSigner::new();
        assert!(matches!(
            signer.sign("missing", b"x").await,
            Err(KeyError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rotation_requires_manual_intervention() {
        let signer = LocalSigner::new().with_evm_key("evm-1", TEST_EVM_KEY).unwrap();
        assert!(matches!(
            signer.rotate_key("evm-1").await,
            Err(KeyError::ManualRotationRequired { .. })
        ));
    }
}
