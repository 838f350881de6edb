//! Collaborators the registry drives during registration.
//!
//! The certificate handshake and name resolution are supplied from
//! outside. Both are async and may take a network round trip.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use dcproxy_core::{CertInfo, NegotiationError, ProxyContext};

/// Performs the certificate handshake with one resolver.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Fetch and verify the resolver's current certificate.
    ///
    /// `public_key` is the provider's long-term Ed25519 key from the stamp.
    async fn negotiate(
        &self,
        ctx: &ProxyContext,
        public_key: &[u8; 32],
        address: &str,
        provider_name: &str,
    ) -> Result<CertInfo, NegotiationError>;
}

/// Turns an address string into socket endpoints.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_udp(&self, address: &str) -> io::Result<SocketAddr>;
    async fn resolve_tcp(&self, address: &str) -> io::Result<SocketAddr>;
}

/// Resolver backed by the system's name lookup.
///
/// Takes the first IPv4 result, or the first result of any family when
/// there is no IPv4 one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    async fn lookup(address: &str) -> io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address).await?.collect();
        pick_address(&addrs).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {address}"),
            )
        })
    }
}

fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve_udp(&self, address: &str) -> io::Result<SocketAddr> {
        Self::lookup(address).await
    }

    async fn resolve_tcp(&self, address: &str) -> io::Result<SocketAddr> {
        Self::lookup(address).await
    }
}
