//! dcproxy-core: upstream resolver data model, key handling and configuration.
//! The registry crate builds on these types.

pub mod cert;
pub mod config;
pub mod server;
pub mod stamp;

pub use cert::{CertError, CertInfo, CryptoConstruction, NegotiationError};
pub use config::{ConfigError, ProxyConfig, ProxyContext, ServerConfig};
pub use server::{ServerInfo, TIMEOUT_MAX, TIMEOUT_MIN};
pub use stamp::{KeyError, ServerStamp, PUBLIC_KEY_LEN};
