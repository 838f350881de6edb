//! Server stamps, the static description of one configured upstream.
//!
//! A stamp is taken at face value when built. The public key is only
//! checked when the stamp is registered, so one bad entry in a config file
//! does not prevent the others from loading.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of an Ed25519 public key, the only key size a stamp may carry.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Immutable descriptor of one upstream resolver.
///
/// `name` is the identity key in the registry: two stamps with the same
/// name describe the same logical upstream across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStamp {
    pub name: String,
    /// `host:port` the resolver listens on.
    pub address: String,
    /// Hex-encoded Ed25519 provider key. Colon-separated groups are allowed.
    pub public_key: String,
    /// Provider name presented to the resolver during negotiation.
    pub provider_name: String,
}

impl ServerStamp {
    /// Build a stamp from four plain strings. No validation happens here.
    pub fn from_legacy(
        name: impl Into<String>,
        address: impl Into<String>,
        public_key: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            public_key: public_key.into(),
            provider_name: provider_name.into(),
        }
    }

    /// Decode the provider public key.
    ///
    /// Separators (`:`) and whitespace are stripped before hex decoding.
    /// The result must be exactly [`PUBLIC_KEY_LEN`] bytes.
    pub fn decode_public_key(&self) -> Result<[u8; PUBLIC_KEY_LEN], KeyError> {
        let cleaned: String = self
            .public_key
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect();
        let bytes = hex::decode(&cleaned)?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(KeyError::Length {
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; PUBLIC_KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("public key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("public key must be {PUBLIC_KEY_LEN} bytes, got {actual}")]
    Length { actual: usize },
}
