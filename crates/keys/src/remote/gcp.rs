use async_trait::async_trait;
use google_cloud_googleapis::cloud::kms::v1::{
    AsymmetricSignRequest, Digest, GetPublicKeyRequest,
};
use google_cloud_kms::client::{Client, ClientConfig};

use crate::backend::{KeyType, PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

use super::RotationTags;

/// Google Cloud KMS signing backend. `key_id` is the fully-qualified
/// `CryptoKeyVersion` resource name
/// (`projects/.../locations/.../keyRings/.../cryptoKeys/.../cryptoKeyVersions/...`).
/// Signs a SHA-256 digest of the message with the version's asymmetric key.
pub struct GcpKmsBackend {
    client: Client,
}

impl GcpKmsBackend {
    pub async fn new() -> Result<Self, KeyError> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        let client = Client::new(config)
            .await
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SigningBackend for GcpKmsBackend {
    fn backend_name(&self) -> &'static str {
        "gcp-kms"
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        let digest = sha256(message);
        let request = AsymmetricSignRequest {
            name: key_id.to_string(),
            digest: Some(Digest {
                digest: Some(google_cloud_googleapis::cloud::kms::v1::digest::Digest::Sha256(
                    digest.to_vec(),
                )),
            }),
            ..Default::default()
        };

        let resp = self
            .client
            .asymmetric_sign(request, None)
            .await
            .map_err(|e| map_kms_error(key_id, e.to_string()))?;

        Ok(Signature(resp.signature))
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        let request = GetPublicKeyRequest {
            name: key_id.to_string(),
        };
        let resp = self
            .client
            .get_public_key(request, None)
            .await
            .map_err(|e| map_kms_error(key_id, e.to_string()))?;

        Ok(PublicKey {
            key_type: KeyType::infer(key_id).unwrap_or(KeyType::Evm),
            bytes: resp.pem.into_bytes(),
        })
    }

    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError> {
        // Cloud KMS rotation creates a new CryptoKeyVersion under the same
        // CryptoKey rather than minting a wholly new key resource; the
        // `{purpose, keyType, rotatedFrom}` tags live in the version's
        // labels rather than a create-key call.
        let _tags = RotationTags {
            purpose: "conduit-signing".into(),
            key_type: "EC_SIGN_SECP256K1_SHA256".into(),
            rotated_from: key_id.to_string(),
        };
        Err(KeyError::OperationFailed(
            "GCP KMS key rotation must be performed via CryptoKeyVersion creation outside this call path".into(),
        ))
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn map_kms_error(key_id: &str, detail: String) -> KeyError {
    if detail.contains("NOT_FOUND") {
        KeyError::KeyNotFound {
            key_id: key_id.to_string(),
        }
    } else if detail.contains("PERMISSION_DENIED") || detail.contains("UNAUTHENTICATED") {
        KeyError::InvalidPin
    } else {
        KeyError::Backend(detail)
    }
}
