//! Newnym - proxied HTTP client with identity rotation
//!
//! Sends requests through a forward proxy (typically Tor behind a local HTTP
//! proxy) and asks the proxy's control port for a new identity between them.
//!
//! ## Features
//!
//! - HTTP and SOCKS5 forward proxies, CONNECT tunnels and TLS for https targets
//! - Randomized User-Agent per request
//! - `AUTHENTICATE` + `signal NEWNYM` over the control port, optionally after every fetch
//! - Configuration from environment variables

pub mod config;
pub mod control;
pub mod error;
pub mod identity;
pub mod models;
pub mod proxy;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, ProxyConfig};
pub use control::{IdentityRotator, TorControl};
pub use error::{ControlError, Error, FetchError, Result};
pub use identity::IdentityGenerator;
pub use models::{FetchRequest, FetchResult};
pub use proxy::ProxySession;
