//! Negotiated certificate material.
//!
//! The certificate handshake itself lives outside this crate. Whatever
//! performs it hands back a [`CertInfo`]: the magic query prefix, the
//! verified resolver key, the derived shared key and the construction to
//! encrypt with.
//!
//! The shared key is held in `Zeroizing` and wiped from memory on drop.
//! It is never printed by `Debug`.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

// ── Crypto construction ───────────────────────────────────────────────────────

/// Cipher construction a session with a resolver must use.
///
/// The discriminants are the `es-version` values carried in resolver
/// certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CryptoConstruction {
    /// X25519 + XSalsa20-Poly1305.
    XSalsa20Poly1305 = 0x0001,
    /// X25519 + XChaCha20-Poly1305.
    XChacha20Poly1305 = 0x0002,
}

impl CryptoConstruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoConstruction::XSalsa20Poly1305 => "xsalsa20poly1305",
            CryptoConstruction::XChacha20Poly1305 => "xchacha20poly1305",
        }
    }
}

impl fmt::Display for CryptoConstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u16> for CryptoConstruction {
    type Error = CertError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(CryptoConstruction::XSalsa20Poly1305),
            0x0002 => Ok(CryptoConstruction::XChacha20Poly1305),
            other => Err(CertError::UnknownConstruction(other)),
        }
    }
}

impl From<CryptoConstruction> for u16 {
    fn from(c: CryptoConstruction) -> u16 {
        c as u16
    }
}

// ── Cert info ─────────────────────────────────────────────────────────────────

/// Result of a successful certificate negotiation with one resolver.
#[derive(Clone)]
pub struct CertInfo {
    /// Prefix for every query sent to this resolver.
    pub magic_query: [u8; 8],
    /// Resolver's current short-term public key, verified against the
    /// provider key.
    pub server_pk: [u8; 32],
    /// Symmetric key derived by the handshake.
    pub shared_key: Zeroizing<[u8; 32]>,
    pub crypto_construction: CryptoConstruction,
}

impl CertInfo {
    pub fn new(
        magic_query: [u8; 8],
        server_pk: [u8; 32],
        shared_key: [u8; 32],
        crypto_construction: CryptoConstruction,
    ) -> Self {
        Self {
            magic_query,
            server_pk,
            shared_key: Zeroizing::new(shared_key),
            crypto_construction,
        }
    }
}

impl fmt::Debug for CertInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertInfo")
            .field("magic_query", &hex::encode(self.magic_query))
            .field("server_pk", &hex::encode(self.server_pk))
            .field("shared_key", &"<redacted>")
            .field("crypto_construction", &self.crypto_construction)
            .finish()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CertError {
    #[error("unknown crypto construction {0:#06x}")]
    UnknownConstruction(u16),
}

/// Failure reported by a certificate negotiator.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("certificate negotiation timed out")]
    Timeout,

    #[error("no valid certificate: {0}")]
    NoValidCertificate(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
