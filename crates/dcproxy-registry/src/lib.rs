//! dcproxy-registry: the concurrent set of live upstream servers.
//!
//! Registration drives the certificate negotiator and the address
//! resolver, installs the result, and hands out random servers to the
//! query path. `CertRefresher` re-runs registration on a timer so
//! certificate rotation upstream is picked up.

pub mod refresher;
pub mod registry;
pub mod upstream;

pub use refresher::CertRefresher;
pub use registry::{RefreshReport, RegisterError, RegistryError, ServerStatus, ServersInfo};
pub use upstream::{Negotiator, Resolver, SystemResolver};
