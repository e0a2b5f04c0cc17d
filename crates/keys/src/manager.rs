use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::backend::{PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

/// Wraps a [`SigningBackend`] so every sign/rotate call is bracketed by
/// audit events carrying only the key id, node id, backend name, timestamp,
/// and *hashes* of messages/signatures — never the raw values.
pub struct KeyManager {
    backend: Box<dyn SigningBackend>,
    audit: AuditLogger,
    node_id: String,
}

impl KeyManager {
    pub fn new(backend: Box<dyn SigningBackend>, node_id: impl Into<String>) -> Self {
        Self {
            backend,
            audit: AuditLogger::new(),
            node_id: node_id.into(),
        }
    }

    pub async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        self.emit(AuditEventKind::SignRequest, key_id, context_with("messageHash", hash_hex(message)));

        match self.backend.sign(key_id, message).await {
            Ok(signature) => {
                self.emit(
                    AuditEventKind::SignSuccess,
                    key_id,
                    context_with("signatureHash", hash_hex(&signature.0)),
                );
                Ok(signature)
            }
            Err(err) => {
                let mut ctx = context_with("messageHash", hash_hex(message));
                ctx.insert("error".into(), err.to_string());
                if matches!(err, KeyError::InvalidPin) {
                    self.emit(AuditEventKind::KeyAccessDenied, key_id, ctx);
                } else {
                    self.emit(AuditEventKind::SignFailure, key_id, ctx);
                }
                Err(err)
            }
        }
    }

    pub async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        self.backend.get_public_key(key_id).await
    }

    pub async fn rotate_key(&self, old_key_id: &str) -> Result<String, KeyError> {
        self.emit(AuditEventKind::KeyRotationStart, old_key_id, BTreeMap::new());
        let result = self.backend.rotate_key(old_key_id).await;
        match &result {
            Ok(new_key_id) => {
                let mut ctx = BTreeMap::new();
                ctx.insert("newKeyId".into(), new_key_id.clone());
                self.emit(AuditEventKind::KeyRotationComplete, old_key_id, ctx);
            }
            Err(err) => {
                let mut ctx = BTreeMap::new();
                ctx.insert("error".into(), err.to_string());
                self.emit(AuditEventKind::SignFailure, old_key_id, ctx);
            }
        }
        result
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    fn emit(&self, kind: AuditEventKind, key_id: &str, context: BTreeMap<String, String>) {
        self.audit.record(AuditEvent {
            kind,
            key_id: key_id.to_string(),
            node_id: self.node_id.clone(),
            backend: self.backend.backend_name(),
            timestamp: OffsetDateTime::now_utc(),
            context,
        });
    }
}

fn context_with(key: &str, value: String) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value);
    map
}

fn hash_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSigner;

    #[tokio::test]
    async fn sign_emits_audit_events_without_leaking_message() {
        let signer = LocalSigner::new()
            .with_evm_key(
                "evm-1",
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            )
            .unwrap();
        let manager = KeyManager::new(Box::new(signer), "node-1");
        let signature = manager.sign("evm-1", b"packet payload").await.unwrap();
        assert!(!signature.0.is_empty());
    }

    #[tokio::test]
    async fn rotation_failure_is_propagated() {
        let signer = LocalSigner::new()
            .with_evm_key(
                "evm-1",
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            )
            .unwrap();
        let manager = KeyManager::new(Box::new(signer), "node-1");
        assert!(manager.rotate_key("evm-1").await.is_err());
    }
}
