//! Live, authenticated record for one upstream resolver.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::cert::{CertInfo, CryptoConstruction};

/// Session timeout every (re)registered server starts from.
pub const TIMEOUT_MIN: Duration = Duration::from_secs(1);

/// Upper bound for a server's timeout. See [`ServerInfo::with_timeout`].
pub const TIMEOUT_MAX: Duration = Duration::from_secs(5);

/// A registered upstream: certificate material, name, timeout and the
/// resolved endpoints.
///
/// Never mutated in place. A re-registration builds a new value and the
/// registry swaps it in.
#[derive(Clone)]
pub struct ServerInfo {
    pub magic_query: [u8; 8],
    pub server_pk: [u8; 32],
    pub shared_key: Zeroizing<[u8; 32]>,
    pub crypto_construction: CryptoConstruction,
    pub name: String,
    pub timeout: Duration,
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
}

impl ServerInfo {
    /// Assemble a record from negotiated material. The timeout is reset
    /// to [`TIMEOUT_MIN`].
    pub fn new(
        name: impl Into<String>,
        cert: CertInfo,
        udp_addr: SocketAddr,
        tcp_addr: SocketAddr,
    ) -> Self {
        Self {
            magic_query: cert.magic_query,
            server_pk: cert.server_pk,
            shared_key: cert.shared_key,
            crypto_construction: cert.crypto_construction,
            name: name.into(),
            timeout: TIMEOUT_MIN,
            udp_addr,
            tcp_addr,
        }
    }

    /// Copy of this record with its timeout set to `timeout`, clamped to
    /// [`TIMEOUT_MIN`]..=[`TIMEOUT_MAX`]. Used by the query path to back off
    /// a slow server without touching the registered record.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: timeout.clamp(TIMEOUT_MIN, TIMEOUT_MAX),
            ..self.clone()
        }
    }

    /// Short hex prefix of the resolver key, for log lines.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.server_pk[..8])
    }
}

impl fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("name", &self.name)
            .field("magic_query", &hex::encode(self.magic_query))
            .field("server_pk", &hex::encode(self.server_pk))
            .field("shared_key", &"<redacted>")
            .field("crypto_construction", &self.crypto_construction)
            .field("timeout", &self.timeout)
            .field("udp_addr", &self.udp_addr)
            .field("tcp_addr", &self.tcp_addr)
            .finish()
    }
}
