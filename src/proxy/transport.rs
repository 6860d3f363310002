//! Proxy transport layer for HTTP and SOCKS5 forward proxies
//!
//! Opens the data-plane connection a fetch is sent over.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use url::Url;

use crate::config::{ProxyConfig, ProxyProtocol};
use crate::error::FetchError;

/// Largest CONNECT response head accepted from the proxy
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Trait for proxied connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Host and port a request is ultimately addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Self, FetchError> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(FetchError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(format!("missing host in {}", url)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::InvalidUrl(format!("missing port in {}", url)))?;

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    pub fn authority(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }
}

/// Proxy transport handler
///
/// Dials targets through the configured forward proxy:
/// - plain `http` targets over an HTTP proxy get a raw connection to the proxy
///   and are sent in absolute form
/// - `https` targets over an HTTP proxy go through a CONNECT tunnel
/// - SOCKS5 proxies are asked to connect to the target directly
#[derive(Clone)]
pub struct ProxyTransport {
    protocol: ProxyProtocol,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    tls: Arc<ClientConfig>,
}

impl ProxyTransport {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            protocol: config.proxy_protocol,
            host: config.proxy_host.clone(),
            port: config.proxy_port,
            username: config.proxy_username.clone(),
            password: config.proxy_password.clone(),
            tls: default_tls_config(),
        }
    }

    pub fn proxy_address(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }

    /// Whether requests to `target` are sent to the proxy in absolute form
    pub fn uses_absolute_form(&self, target: &Target) -> bool {
        self.protocol == ProxyProtocol::Http && !target.tls
    }

    /// `Proxy-Authorization` value for absolute-form requests
    pub fn proxy_authorization(&self) -> Option<String> {
        let username = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
    }

    /// Open a connection that an HTTP/1.1 request for `target` can be written to
    #[instrument(skip(self, target), fields(proxy = %self.proxy_address(), target = %target.authority()))]
    pub async fn connect(&self, target: &Target) -> Result<Box<dyn ProxyConnection>, FetchError> {
        if self.uses_absolute_form(target) {
            debug!("Connecting to HTTP proxy at {}", self.proxy_address());
            let stream = TcpStream::connect(self.proxy_address())
                .await
                .map_err(|e| transport_error("TCP connect to proxy failed", e))?;
            return Ok(Box::new(stream));
        }

        let stream = self.open_tunnel(&target.host, target.port).await?;

        if target.tls {
            let stream = self.wrap_tls(stream, &target.host).await?;
            return Ok(Box::new(stream));
        }

        Ok(Box::new(stream))
    }

    /// Open a byte stream to `host:port` through the proxy
    pub async fn open_tunnel(&self, host: &str, port: u16) -> Result<TcpStream, FetchError> {
        match self.protocol {
            ProxyProtocol::Http => self.connect_via_http_proxy(host, port).await,
            ProxyProtocol::Socks5 => self.connect_via_socks5_proxy(host, port).await,
        }
    }

    /// Connect through HTTP CONNECT method
    async fn connect_via_http_proxy(
        &self,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream, FetchError> {
        debug!("Connecting to HTTP proxy at {}", self.proxy_address());

        let mut stream = TcpStream::connect(self.proxy_address())
            .await
            .map_err(|e| transport_error("TCP connect to proxy failed", e))?;

        let request = self.build_connect_request(target_host, target_port);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| transport_error("Failed to send CONNECT", e))?;

        let head = read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or("");
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(FetchError::TransportFailed(format!(
                "CONNECT failed: {}",
                if status_line.is_empty() {
                    "Unknown error"
                } else {
                    status_line
                }
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(&self, target_host: &str, target_port: u16) -> String {
        let authority = format_tcp_addr(target_host, target_port);
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if let Some(value) = self.proxy_authorization() {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", value));
        }

        request.push_str("\r\n");
        request
    }

    /// Connect through SOCKS5 proxy; the proxy resolves the hostname
    async fn connect_via_socks5_proxy(
        &self,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream, FetchError> {
        debug!("Connecting to SOCKS5 proxy at {}", self.proxy_address());

        let socket = TcpStream::connect(self.proxy_address())
            .await
            .map_err(|e| transport_error("TCP connect to proxy failed", e))?;

        let stream = match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(
                    socket,
                    (target_host, target_port),
                    username,
                    password,
                )
                .await
            }
            _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await,
        }
        .map_err(|e| transport_error("SOCKS5 connect failed", e))?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }

    async fn wrap_tls(
        &self,
        stream: TcpStream,
        host: &str,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, FetchError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| FetchError::InvalidUrl(format!("invalid server name '{}': {}", host, e)))?;

        TlsConnector::from(self.tls.clone())
            .connect(server_name, stream)
            .await
            .map_err(|e| transport_error("TLS handshake failed", e))
    }
}

fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Read an HTTP response head (up to the blank line) from the proxy
async fn read_response_head(stream: &mut TcpStream) -> Result<String, FetchError> {
    let mut head = Vec::with_capacity(256);
    let mut buf = [0u8; 512];

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| transport_error("Failed to read CONNECT response", e))?;
        if n == 0 {
            if head.is_empty() {
                return Err(FetchError::TransportFailed(
                    "empty CONNECT response".to_string(),
                ));
            }
            break;
        }

        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_CONNECT_RESPONSE {
            return Err(FetchError::TransportFailed(
                "CONNECT response head too large".to_string(),
            ));
        }
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn transport_error(context: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::TransportFailed(format!("{}: {}", context, err))
}

/// Format `host:port`, bracketing bare IPv6 hosts
pub fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
