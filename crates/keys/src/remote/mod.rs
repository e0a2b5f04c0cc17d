//! Remote KMS backends: three providers behind the same [`crate::SigningBackend`]
//! contract. Each signs with the provider's raw-
//! message ECDSA/EdDSA primitive, retrieves public keys in raw or
//! uncompressed form, and creates a new key on rotation tagged with
//! `{purpose, keyType, rotatedFrom}`.
//!
//! Each provider is feature-gated (`aws-kms`, `gcp-kms`, `azure-kms`), so
//! `aws-sdk-kms`/`aws-config` (and the GCP/Azure equivalents) are only
//! pulled in when the corresponding feature is enabled.

#[cfg(feature = "aws-kms")]
pub mod aws;
#[cfg(feature = "azure-kms")]
pub mod azure;
#[cfg(feature = "gcp-kms")]
pub mod gcp;

/// Tags attached to a newly-created key on rotation.
#[derive(Debug, Clone)]
pub struct RotationTags {
    pub purpose: String,
    pub key_type: String,
    pub rotated_from: String,
}
