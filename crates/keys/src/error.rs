/// Error taxonomy for the signing subsystem.
///
/// Known HSM/KMS provider error codes are mapped onto these three variants
/// at the backend boundary; everything else falls into `OperationFailed` or
/// `Backend` with provider-specific context preserved for logging.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key {key_id} not found")]
    KeyNotFound { key_id: String },

    #[error("invalid PIN/credential for backend")]
    InvalidPin,

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("key {key_id} does not support automatic rotation")]
    ManualRotationRequired { key_id: String },

    #[error("backend error: {0}")]
    Backend(String),
}
