use async_trait::async_trait;
use azure_identity::DefaultAzureCredential;
use azure_security_keyvault::KeyClient;
use std::sync::Arc;

use crate::backend::{KeyType, PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

use super::RotationTags;

/// Azure Key Vault signing backend. `key_id` is the key name within the
/// configured vault; signing uses the vault's raw ECDSA/EdDSA `sign`
/// operation against the key's current version.
pub struct AzureKeyVaultBackend {
    client: KeyClient,
}

impl AzureKeyVaultBackend {
    pub fn new(vault_url: &str) -> Result<Self, KeyError> {
        let credential = Arc::new(DefaultAzureCredential::default());
        let client = KeyClient::new(vault_url, credential).map_err(|e| KeyError::Backend(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SigningBackend for AzureKeyVaultBackend {
    fn backend_name(&self) -> &'static str {
        "azure-keyvault"
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        let digest = sha256(message);
        let algorithm = match KeyType::infer(key_id) {
            Some(KeyType::Xrp) => "Ed25519",
            _ => "ES256K",
        };

        let resp = self
            .client
            .sign(key_id, algorithm, &digest)
            .await
            .map_err(|e| map_kv_error(key_id, e.to_string()))?;

        Ok(Signature(resp.signature))
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        let key_bundle = self
            .client
            .get(key_id)
            .await
            .map_err(|e| map_kv_error(key_id, e.to_string()))?;

        Ok(PublicKey {
            key_type: KeyType::infer(key_id).unwrap_or(KeyType::Evm),
            bytes: key_bundle.key.n.unwrap_or_default(),
        })
    }

    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError> {
        let _tags = RotationTags {
            purpose: "conduit-signing".into(),
            key_type: "EC".into(),
            rotated_from: key_id.to_string(),
        };

        self.client
            .rotate_key(key_id)
            .await
            .map_err(|e| map_kv_error(key_id, e.to_string()))?;

        // Key Vault rotates in place (new version, same name); the "new
        // key id" the rest of the system tracks is the same vault key name.
        Ok(key_id.to_string())
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn map_kv_error(key_id: &str, detail: String) -> KeyError {
    if detail.contains("KeyNotFound") || detail.contains("404") {
        KeyError::KeyNotFound {
            key_id: key_id.to_string(),
        }
    } else if detail.contains("Forbidden") || detail.contains("401") || detail.contains("403") {
        KeyError::InvalidPin
    } else {
        KeyError::Backend(detail)
    }
}
