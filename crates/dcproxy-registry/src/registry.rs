//! The server registry. Live upstreams shared between the query path,
//! the refresh timer and runtime registrations.
//!
//! One record per server name, holding the stamp it was built from and the
//! current `ServerInfo`. Both are replaced together, so a refresh always
//! re-negotiates with the latest stamp.
//!
//! Registration does all network work (negotiation, resolution) before
//! touching the lock. The write lock is taken only to install the finished
//! record, so a failed or slow negotiation never leaves a partial entry
//! behind and never blocks readers.
//!
//! Installs are ordered per name. Every registration takes a ticket before
//! it starts negotiating, and a registration never overwrites a record whose
//! stamp came from a later ticket. A refresh only installs over the exact
//! record it read; if anything was installed for that name in the meantime
//! its result is dropped.
//!
//! Selection hands out an `Arc<ServerInfo>` snapshot. A later
//! re-registration swaps in a new `Arc` and leaves the caller's copy intact.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use dcproxy_core::{KeyError, NegotiationError, ProxyContext, ServerInfo, ServerStamp};

use crate::upstream::{Negotiator, Resolver};

#[derive(Debug, Clone)]
struct ServerEntry {
    name: String,
    stamp: ServerStamp,
    info: Arc<ServerInfo>,
    /// Ticket of the registration that supplied `stamp`.
    stamp_seq: u64,
    /// Generation at which this record was installed.
    installed_at: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order. Slots are never removed.
    entries: Vec<ServerEntry>,
    by_name: HashMap<String, usize>,
    /// Bumped on every install.
    generation: u64,
}

/// Registry of negotiated upstream servers.
pub struct ServersInfo {
    ctx: ProxyContext,
    negotiator: Arc<dyn Negotiator>,
    resolver: Arc<dyn Resolver>,
    inner: RwLock<Inner>,
    next_seq: AtomicU64,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

/// Outcome of one refresh pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Servers whose record was replaced.
    pub refreshed: Vec<String>,
    /// Servers that kept their previous record, with the reason.
    pub failed: Vec<(String, RegisterError)>,
    /// Servers re-registered by someone else while their refresh was in
    /// flight. The newer record was kept.
    pub superseded: Vec<String>,
}

impl RefreshReport {
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Operator-facing view of one registered server. Carries no key material
/// beyond the resolver's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub address: String,
    pub provider_name: String,
    pub server_pk: String,
    pub crypto_construction: String,
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
}

impl ServersInfo {
    pub fn new(
        ctx: ProxyContext,
        negotiator: Arc<dyn Negotiator>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            ctx,
            negotiator,
            resolver,
            inner: RwLock::new(Inner::default()),
            next_seq: AtomicU64::new(0),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Replace the random source used by [`select_one`](Self::select_one).
    ///
    /// A seeded `StdRng` makes selection sequences reproducible.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    pub fn context(&self) -> &ProxyContext {
        &self.ctx
    }

    /// Negotiate with the server described by `stamp` and install the
    /// result under `name`.
    ///
    /// An existing record with the same name is replaced wholesale. On any
    /// error the registry is left exactly as it was.
    ///
    /// When two registrations of one name overlap, the one that started last
    /// wins. The other returns [`RegisterError::Superseded`].
    pub async fn register(&self, name: &str, stamp: ServerStamp) -> Result<(), RegisterError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let info = self.fetch_server_info(name, &stamp).await?;
        let fingerprint = info.fingerprint();
        let construction = info.crypto_construction;

        match self.install(name, stamp, info, Origin::Register { seq }).await {
            Installed::Superseded => {
                tracing::debug!(server = name, "registration overtaken by a newer one");
                Err(RegisterError::Superseded {
                    name: name.to_string(),
                })
            }
            outcome => {
                tracing::info!(
                    server = name,
                    server_pk = %fingerprint,
                    construction = %construction,
                    added = matches!(outcome, Installed::Added),
                    "server registered"
                );
                Ok(())
            }
        }
    }

    /// Register every stamp in order. Failures are logged and skipped.
    ///
    /// Returns how many registrations succeeded.
    pub async fn register_all(&self, stamps: impl IntoIterator<Item = ServerStamp>) -> usize {
        let mut ok = 0;
        for stamp in stamps {
            let name = stamp.name.clone();
            match self.register(&name, stamp).await {
                Ok(()) => ok += 1,
                Err(e) if e.is_config() => {
                    tracing::error!(server = %name, error = %e, "invalid server configuration, skipping");
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to register server");
                }
            }
        }
        ok
    }

    /// Re-negotiate every known server.
    ///
    /// Runs sequentially over the names registered when it starts. Each
    /// server is re-negotiated with the stamp it holds at that moment. A
    /// server that fails keeps its previous record and stays selectable.
    pub async fn refresh(&self) -> RefreshReport {
        let names = self.names().await;
        tracing::info!(servers = names.len(), "refreshing certificates");

        let mut report = RefreshReport::default();
        for name in names {
            match self.refresh_one(&name).await {
                Ok(Installed::Superseded) => {
                    tracing::debug!(server = %name, "re-registered during refresh, keeping newer entry");
                    report.superseded.push(name);
                }
                Ok(_) => report.refreshed.push(name),
                Err(e) => {
                    tracing::warn!(
                        server = %name,
                        error = %e,
                        "certificate refresh failed, keeping previous entry"
                    );
                    report.failed.push((name, e));
                }
            }
        }

        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            superseded = report.superseded.len(),
            "certificate refresh done"
        );
        report
    }

    /// Pick one registered server uniformly at random.
    pub async fn select_one(&self) -> Result<Arc<ServerInfo>, RegistryError> {
        let inner = self.inner.read().await;
        if inner.entries.is_empty() {
            return Err(RegistryError::NoServers);
        }
        let slot = self.random_slot(inner.entries.len());
        Ok(inner.entries[slot].info.clone())
    }

    /// Current record for `name`, if registered.
    pub async fn get(&self, name: &str) -> Option<Arc<ServerInfo>> {
        let inner = self.inner.read().await;
        inner
            .by_name
            .get(name)
            .map(|&slot| inner.entries[slot].info.clone())
    }

    /// Stamp the current record for `name` was built from.
    pub async fn stamp(&self, name: &str) -> Option<ServerStamp> {
        let inner = self.inner.read().await;
        inner
            .by_name
            .get(name)
            .map(|&slot| inner.entries[slot].stamp.clone())
    }

    /// Registered names in registration order.
    pub async fn names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Status of every registered server, in registration order.
    pub async fn status(&self) -> Vec<ServerStatus> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|e| ServerStatus {
                name: e.name.clone(),
                address: e.stamp.address.clone(),
                provider_name: e.stamp.provider_name.clone(),
                server_pk: hex::encode(e.info.server_pk),
                crypto_construction: e.info.crypto_construction.to_string(),
                udp_addr: e.info.udp_addr,
                tcp_addr: e.info.tcp_addr,
            })
            .collect()
    }

    /// Number of installs since the registry was created.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }
}

impl ServersInfo {
    /// Build a complete record without holding the registry lock.
    async fn fetch_server_info(
        &self,
        name: &str,
        stamp: &ServerStamp,
    ) -> Result<ServerInfo, RegisterError> {
        let public_key = stamp
            .decode_public_key()
            .map_err(|source| RegisterError::InvalidPublicKey {
                name: name.to_string(),
                source,
            })?;

        tracing::debug!(server = name, address = %stamp.address, "negotiating certificate");
        let cert = self
            .negotiator
            .negotiate(&self.ctx, &public_key, &stamp.address, &stamp.provider_name)
            .await
            .map_err(|source| RegisterError::Negotiation {
                name: name.to_string(),
                source,
            })?;

        let resolution_error = |source| RegisterError::Resolution {
            name: name.to_string(),
            address: stamp.address.clone(),
            source,
        };
        let udp_addr = self
            .resolver
            .resolve_udp(&stamp.address)
            .await
            .map_err(resolution_error)?;
        let tcp_addr = self
            .resolver
            .resolve_tcp(&stamp.address)
            .await
            .map_err(resolution_error)?;

        Ok(ServerInfo::new(name, cert, udp_addr, tcp_addr))
    }

    /// Re-negotiate one server from its current stamp.
    async fn refresh_one(&self, name: &str) -> Result<Installed, RegisterError> {
        let current = {
            let inner = self.inner.read().await;
            inner
                .by_name
                .get(name)
                .map(|&slot| (inner.entries[slot].stamp.clone(), inner.entries[slot].installed_at))
        };
        let Some((stamp, installed_at)) = current else {
            return Ok(Installed::Superseded);
        };

        let info = self.fetch_server_info(name, &stamp).await?;
        Ok(self
            .install(name, stamp, info, Origin::Refresh { installed_at })
            .await)
    }

    /// Swap a finished record in, unless `origin` has been overtaken.
    async fn install(
        &self,
        name: &str,
        stamp: ServerStamp,
        info: ServerInfo,
        origin: Origin,
    ) -> Installed {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let slot = inner.by_name.get(name).copied();

        let current = slot.map(|slot| &inner.entries[slot]);
        let stamp_seq = match (origin, current) {
            (Origin::Register { seq }, Some(current)) if seq < current.stamp_seq => {
                return Installed::Superseded;
            }
            (Origin::Register { seq }, _) => seq,
            (Origin::Refresh { installed_at }, Some(current))
                if current.installed_at == installed_at =>
            {
                current.stamp_seq
            }
            (Origin::Refresh { .. }, _) => return Installed::Superseded,
        };

        inner.generation += 1;
        let entry = ServerEntry {
            name: name.to_string(),
            stamp,
            info: Arc::new(info),
            stamp_seq,
            installed_at: inner.generation,
        };
        match slot {
            Some(slot) => {
                inner.entries[slot] = entry;
                Installed::Replaced
            }
            None => {
                inner.by_name.insert(name.to_string(), inner.entries.len());
                inner.entries.push(entry);
                Installed::Added
            }
        }
    }

    fn random_slot(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..len)
    }
}

/// What produced a finished record, and what it must not overwrite.
#[derive(Debug, Clone, Copy)]
enum Origin {
    /// A registration holding ticket `seq`.
    Register { seq: u64 },
    /// A refresh of the record installed at generation `installed_at`.
    Refresh { installed_at: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Installed {
    Added,
    Replaced,
    Superseded,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a registration did not install anything.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The stamp's public key is malformed. Nothing was sent on the network.
    #[error("invalid public key for server {name}: {source}")]
    InvalidPublicKey {
        name: String,
        #[source]
        source: KeyError,
    },

    #[error("certificate negotiation with {name} failed: {source}")]
    Negotiation {
        name: String,
        #[source]
        source: NegotiationError,
    },

    #[error("failed to resolve {address} for {name}: {source}")]
    Resolution {
        name: String,
        address: String,
        #[source]
        source: io::Error,
    },

    /// A registration of the same name that started later was installed
    /// first. Its record was kept.
    #[error("registration of {name} was overtaken by a newer one")]
    Superseded { name: String },
}

impl RegisterError {
    /// True for configuration mistakes that a retry will not fix.
    pub fn is_config(&self) -> bool {
        matches!(self, RegisterError::InvalidPublicKey { .. })
    }

    pub fn server_name(&self) -> &str {
        match self {
            RegisterError::InvalidPublicKey { name, .. }
            | RegisterError::Negotiation { name, .. }
            | RegisterError::Resolution { name, .. }
            | RegisterError::Superseded { name } => name,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no servers available")]
    NoServers,
}
