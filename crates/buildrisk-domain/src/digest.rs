//! Content-addressed identity for domain objects that need tamper detection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::DomainError;

/// A lowercase hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, DomainError> {
        let bytes = serde_json::to_vec(value).map_err(DomainError::Serialization)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidDigest { value });
        }
        Ok(Self(value.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentDigest::from_bytes(b"hello");
        let b = ContentDigest::from_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn rejects_malformed_digest() {
        assert!(ContentDigest::try_from("not-hex".to_string()).is_err());
        assert!(ContentDigest::try_from("a".repeat(63)).is_err());
        assert!(ContentDigest::try_from("a".repeat(64)).is_ok());
    }
}
