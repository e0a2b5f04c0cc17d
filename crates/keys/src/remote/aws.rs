use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{MessageType, SigningAlgorithmSpec};
use aws_sdk_kms::Client;

use crate::backend::{KeyType, PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

use super::RotationTags;

/// AWS KMS signing backend: raw-message ECDSA over the customer master key
/// identified by `key_id`. Asymmetric CMKs only; `xrp`
/// (Ed25519) keys are not natively supported by KMS and are expected to be
/// routed through [`crate::local::LocalSigner`] or the HSM backend instead.
pub struct AwsKmsBackend {
    client: Client,
}

impl AwsKmsBackend {
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
        }
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SigningBackend for AwsKmsBackend {
    fn backend_name(&self) -> &'static str {
        "aws-kms"
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        let resp = self
            .client
            .sign()
            .key_id(key_id)
            .message(Blob::new(message))
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .map_err(|e| map_kms_error(key_id, e.to_string()))?;

        let sig = resp
            .signature()
            .ok_or_else(|| KeyError::OperationFailed("KMS sign response missing signature".into()))?;
        Ok(Signature(sig.as_ref().to_vec()))
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        let resp = self
            .client
            .get_public_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(|e| map_kms_error(key_id, e.to_string()))?;

        let bytes = resp
            .public_key()
            .ok_or_else(|| KeyError::OperationFailed("KMS response missing public key".into()))?
            .as_ref()
            .to_vec();

        Ok(PublicKey {
            key_type: KeyType::infer(key_id).unwrap_or(KeyType::Evm),
            bytes,
        })
    }

    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError> {
        let tags = RotationTags {
            purpose: "conduit-signing".into(),
            key_type: "ECC_SECG_P256K1".into(),
            rotated_from: key_id.to_string(),
        };

        let resp = self
            .client
            .create_key()
            .description(format!(
                "conduit rotation of {} (purpose={}, keyType={})",
                tags.rotated_from, tags.purpose, tags.key_type
            ))
            .send()
            .await
            .map_err(|e| map_kms_error(key_id, e.to_string()))?;

        let new_key_id = resp
            .key_metadata()
            .and_then(|m| Some(m.key_id().to_string()))
            .ok_or_else(|| KeyError::OperationFailed("KMS create_key response missing key id".into()))?;

        Ok(new_key_id)
    }
}

fn map_kms_error(key_id: &str, detail: String) -> KeyError {
    if detail.contains("NotFoundException") {
        KeyError::KeyNotFound {
            key_id: key_id.to_string(),
        }
    } else if detail.contains("AccessDenied") || detail.contains("InvalidCredentials") {
        KeyError::InvalidPin
    } else {
        KeyError::Backend(detail)
    }
}
