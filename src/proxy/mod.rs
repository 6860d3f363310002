//! Proxied fetching
//!
//! This module provides:
//! - Connections through HTTP (plain and CONNECT) and SOCKS5 forward proxies
//! - A GET client that keeps the raw transfer and follows one redirect
//! - The session manager tying fetches to identity rotation

pub mod client;
pub mod session;
pub mod transport;

pub use client::{FetchedResponse, HttpFetcher};
pub use session::{normalize_target_url, ProxySession};
pub use transport::{ProxyTransport, Target};
