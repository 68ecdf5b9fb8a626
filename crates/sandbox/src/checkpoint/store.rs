//! Raw key-value persistence for checkpoints.

use thiserror::Error;

/// Keys are sandbox ids, so the alphabet is narrow and file-name safe.
pub const MAX_KEY_LENGTH: usize = 250;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint {0} not found")]
    NotFound(String),

    #[error("invalid checkpoint key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Durable byte storage keyed by sandbox id.
///
/// Implementations must allow concurrent calls on different keys without a
/// store-wide lock on the data itself.
pub trait CheckpointStore: Send + Sync {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason| StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid("longer than 250 characters"));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid("only ASCII letters and digits are allowed"));
    }
    Ok(())
}
