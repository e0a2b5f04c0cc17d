use std::sync::Mutex;

use async_trait::async_trait;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType as Pkcs11KeyType, ObjectClass};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;

use crate::backend::{KeyType, PublicKey, Signature, SigningBackend};
use crate::error::KeyError;

/// HSM backend via a process-local PKCS#11 library. Opens one session and logs in once at
/// construction; key objects are located by label on every call (cryptoki
/// session handles are cheap to reuse, object handles are not stable across
/// HSM restarts so we re-find them per operation).
pub struct HsmBackend {
    session: Mutex<Session>,
}

impl HsmBackend {
    pub fn open(pkcs11_module_path: &str, slot: Slot, pin: &str) -> Result<Self, KeyError> {
        let pkcs11 = Pkcs11::new(pkcs11_module_path).map_err(|e| KeyError::Backend(e.to_string()))?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| KeyError::Backend(e.to_string()))?;

        let session = pkcs11
            .open_rw_session(slot)
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        session
            .login(UserType::User, Some(&AuthPin::new(pin.to_string())))
            .map_err(|_| KeyError::InvalidPin)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn find_private_key(&self, session: &Session, label: &str) -> Result<cryptoki::object::ObjectHandle, KeyError> {
        let template = vec![
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Label(label.as_bytes().to_vec()),
        ];
        let handles = session
            .find_objects(&template)
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        handles.into_iter().next().ok_or_else(|| KeyError::KeyNotFound {
            key_id: label.to_string(),
        })
    }

    fn find_public_key(&self, session: &Session, label: &str) -> Result<cryptoki::object::ObjectHandle, KeyError> {
        let template = vec![
            Attribute::Class(ObjectClass::PUBLIC_KEY),
            Attribute::Label(label.as_bytes().to_vec()),
        ];
        let handles = session
            .find_objects(&template)
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        handles.into_iter().next().ok_or_else(|| KeyError::KeyNotFound {
            key_id: label.to_string(),
        })
    }
}

#[async_trait]
impl SigningBackend for HsmBackend {
    fn backend_name(&self) -> &'static str {
        "hsm"
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature, KeyError> {
        let session = self.session.lock().expect("hsm session mutex poisoned");
        let handle = self.find_private_key(&session, key_id)?;

        let mechanism = match KeyType::infer(key_id) {
            Some(KeyType::Xrp) => Mechanism::Eddsa,
            _ => Mechanism::Ecdsa,
        };

        let signature = session
            .sign(&mechanism, handle, message)
            .map_err(|e| KeyError::OperationFailed(e.to_string()))?;
        Ok(Signature(signature))
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKey, KeyError> {
        let session = self.session.lock().expect("hsm session mutex poisoned");
        let handle = self.find_public_key(&session, key_id)?;

        let attrs = session
            .get_attributes(handle, &[AttributeType::EcPoint])
            .map_err(|e| KeyError::OperationFailed(e.to_string()))?;

        let bytes = attrs
            .into_iter()
            .find_map(|a| match a {
                Attribute::EcPoint(point) => Some(point),
                _ => None,
            })
            .ok_or_else(|| KeyError::OperationFailed("HSM object missing EC_POINT attribute".into()))?;

        Ok(PublicKey {
            key_type: KeyType::infer(key_id).unwrap_or(KeyType::Evm),
            bytes,
        })
    }

    async fn rotate_key(&self, key_id: &str) -> Result<String, KeyError> {
        let session = self.session.lock().expect("hsm session mutex poisoned");
        let new_label = format!("{key_id}-rotated");

        let key_type = match KeyType::infer(key_id) {
            Some(KeyType::Xrp) => Pkcs11KeyType::EC_EDWARDS,
            _ => Pkcs11KeyType::EC,
        };

        let public_template = vec![
            Attribute::Token(true),
            Attribute::Label(new_label.as_bytes().to_vec()),
            Attribute::KeyType(key_type),
            Attribute::Verify(true),
        ];
        let private_template = vec![
            Attribute::Token(true),
            Attribute::Label(new_label.as_bytes().to_vec()),
            Attribute::KeyType(key_type),
            Attribute::Sign(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
        ];

        let mechanism = match key_type {
            Pkcs11KeyType::EC_EDWARDS => Mechanism::EccEdwardsKeyPairGen,
            _ => Mechanism::EccKeyPairGen,
        };

        session
            .generate_key_pair(&mechanism, &public_template, &private_template)
            .map_err(|e| KeyError::OperationFailed(e.to_string()))?;

        Ok(new_label)
    }
}
