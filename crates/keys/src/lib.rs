//! Signing backends, key rotation, and the security audit log for the
//! conduit connector.

mod audit;
mod backend;
mod error;
mod hsm;
mod local;
mod manager;
mod remote;
mod rotation;

pub use audit::{AuditEvent, AuditEventKind, AuditLogger};
pub use backend::{KeyType, PublicKey, Signature, SigningBackend};
pub use error::KeyError;
pub use local::LocalSigner;
pub use manager::KeyManager;
pub use rotation::{KeyRotationConfig, KeyRotationManager, KeyRotationMetadata};

#[cfg(feature = "hsm")]
pub use hsm::HsmBackend;

#[cfg(feature = "aws-kms")]
pub use remote::aws::AwsKmsBackend;
#[cfg(feature = "azure-kms")]
pub use remote::azure::AzureKeyVaultBackend;
#[cfg(feature = "gcp-kms")]
pub use remote::gcp::GcpKmsBackend;
