//! Store key generation and handling.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Result, TollgateError};

/// Suffix appended to a bucket key to form its refill-timestamp key.
pub const REFILL_TIME_SUFFIX: &str = "_lastRefillTime";

/// How caller identities are turned into store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Prefix namespacing every key this limiter writes
    pub prefix: String,
    /// Base64-encode identities before appending them to the prefix
    pub encode: bool,
}

impl KeyPolicy {
    /// Create a key policy.
    pub fn new(prefix: impl Into<String>, encode: bool) -> Self {
        Self {
            prefix: prefix.into(),
            encode,
        }
    }

    /// Build the store keys for `identity`.
    pub fn key_for(&self, identity: &str) -> BucketKey {
        let encoded = if self.encode {
            encode_identity(identity)
        } else {
            identity.to_string()
        };
        BucketKey {
            tokens: format!("{}{}", self.prefix, encoded),
        }
    }

    /// Recover the identity from a token-count key written under this policy.
    ///
    /// Useful when inspecting the store by hand.
    pub fn identity_from_key(&self, key: &str) -> Result<String> {
        let encoded = key.strip_prefix(&self.prefix).ok_or_else(|| {
            TollgateError::Config(format!("key {:?} lacks prefix {:?}", key, self.prefix))
        })?;
        if self.encode {
            decode_identity(encoded)
        } else {
            Ok(encoded.to_string())
        }
    }
}

/// The pair of store keys that together hold one identity's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    tokens: String,
}

impl BucketKey {
    /// Key holding the integer token count (or fixed-window counter).
    pub fn tokens(&self) -> &str {
        &self.tokens
    }

    /// Key holding the RFC-3339 timestamp of the last refill.
    pub fn refill_time(&self) -> String {
        format!("{}{}", self.tokens, REFILL_TIME_SUFFIX)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tokens)
    }
}

/// Base64-encode an identity for use inside a store key.
pub fn encode_identity(identity: &str) -> String {
    STANDARD.encode(identity.as_bytes())
}

/// Reverse [`encode_identity`].
pub fn decode_identity(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| TollgateError::Config(format!("invalid encoded identity {:?}: {}", encoded, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| TollgateError::Config(format!("encoded identity is not UTF-8: {}", e)))
}
