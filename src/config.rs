use crate::error::{Error, Result};
use crate::proxy::transport::format_tcp_addr;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy session configuration
    pub proxy: ProxyConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Protocol spoken by the forward proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyProtocol {
    /// HTTP forward proxy (Polipo, Privoxy); CONNECT is used for https targets
    #[default]
    Http,
    /// SOCKS5 proxy (Tor's SocksPort)
    Socks5,
}

impl ProxyProtocol {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks5 => "socks5",
        }
    }
}

/// What to do with the stored identity when post-fetch rotation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityRefreshPolicy {
    /// Refresh the identity whatever the rotation outcome
    #[default]
    Always,
    /// Keep the identity used for the failed rotation until a rotation succeeds
    OnSuccess,
}

impl IdentityRefreshPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "always" => Some(Self::Always),
            "on_success" | "onsuccess" | "on-success" => Some(Self::OnSuccess),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnSuccess => "on_success",
        }
    }
}

/// Everything a `ProxySession` needs to fetch and rotate.
///
/// Immutable once handed to a session. `Debug` output leaves out the proxy
/// password and the control secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Forward proxy host (default: 127.0.0.1)
    pub proxy_host: String,
    /// Forward proxy port (default: 8118)
    pub proxy_port: u16,
    /// Forward proxy protocol (default: http)
    pub proxy_protocol: ProxyProtocol,
    /// Optional forward proxy credentials
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    /// Control port host (default: same as the proxy host)
    pub control_host: String,
    /// Control port (default: 9051)
    pub control_port: u16,
    /// Control port password, sent quoted in AUTHENTICATE
    pub control_secret: String,
    /// Bound on connect and on each reply read of the control exchange
    pub control_timeout_seconds: u32,
    /// Request a new identity after every fetch
    pub auto_rotate_after_request: bool,
    /// Fetch timeout used when a request does not carry one
    pub default_timeout_seconds: u32,
    pub identity_refresh_policy: IdentityRefreshPolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 8118,
            proxy_protocol: ProxyProtocol::Http,
            proxy_username: None,
            proxy_password: None,
            control_host: "127.0.0.1".to_string(),
            control_port: 9051,
            control_secret: String::new(),
            control_timeout_seconds: 30,
            auto_rotate_after_request: true,
            default_timeout_seconds: 30,
            identity_refresh_policy: IdentityRefreshPolicy::Always,
        }
    }
}

impl ProxyConfig {
    /// Proxy at `host:port`; the control port is looked up on the same host.
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16) -> Self {
        let proxy_host = proxy_host.into();
        Self {
            control_host: proxy_host.clone(),
            proxy_host,
            proxy_port,
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.proxy_protocol = protocol;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.proxy_username = Some(username.into());
        self.proxy_password = Some(password.into());
        self
    }

    pub fn with_control(
        mut self,
        host: impl Into<String>,
        port: u16,
        secret: impl Into<String>,
    ) -> Self {
        self.control_host = host.into();
        self.control_port = port;
        self.control_secret = secret.into();
        self
    }

    pub fn with_auto_rotate(mut self, enabled: bool) -> Self {
        self.auto_rotate_after_request = enabled;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }

    pub fn with_control_timeout(mut self, seconds: u32) -> Self {
        self.control_timeout_seconds = seconds;
        self
    }

    pub fn with_refresh_policy(mut self, policy: IdentityRefreshPolicy) -> Self {
        self.identity_refresh_policy = policy;
        self
    }

    /// Get the proxy address as reported in fetch results
    pub fn proxy_address(&self) -> String {
        format_tcp_addr(&self.proxy_host, self.proxy_port)
    }

    /// Get the control port address
    pub fn control_address(&self) -> String {
        format_tcp_addr(&self.control_host, self.control_port)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.control_timeout_seconds.max(1)))
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("proxy", &self.proxy_address())
            .field("protocol", &self.proxy_protocol.as_str())
            .field("username", &self.proxy_username)
            .field("control", &self.control_address())
            .field("control_timeout_seconds", &self.control_timeout_seconds)
            .field("auto_rotate_after_request", &self.auto_rotate_after_request)
            .field("default_timeout_seconds", &self.default_timeout_seconds)
            .field("identity_refresh_policy", &self.identity_refresh_policy.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let proxy_host = get_env_or("PROXY_HOST", "127.0.0.1");
        let control_host = get_env_or("TOR_CONTROL_HOST", &proxy_host);

        let proxy_protocol = ProxyProtocol::from_str(&get_env_or("PROXY_PROTOCOL", "http"))
            .ok_or_else(|| {
                Error::InvalidConfig("PROXY_PROTOCOL must be one of: http, socks5".into())
            })?;

        let identity_refresh_policy =
            IdentityRefreshPolicy::from_str(&get_env_or("TOR_IDENTITY_REFRESH", "always"))
                .ok_or_else(|| {
                    Error::InvalidConfig(
                        "TOR_IDENTITY_REFRESH must be one of: always, on_success".into(),
                    )
                })?;

        Ok(Config {
            proxy: ProxyConfig {
                proxy_port: get_env_or("PROXY_PORT", "8118").parse().map_err(|_| {
                    Error::InvalidConfig("PROXY_PORT must be a valid port number".into())
                })?,
                proxy_host,
                proxy_protocol,
                proxy_username: get_env_opt("PROXY_USERNAME"),
                proxy_password: get_env_opt("PROXY_PASSWORD"),
                control_host,
                control_port: get_env_or("TOR_CONTROL_PORT", "9051").parse().map_err(|_| {
                    Error::InvalidConfig("TOR_CONTROL_PORT must be a valid port number".into())
                })?,
                control_secret: get_env_or("TOR_CONTROL_PASSWORD", ""),
                control_timeout_seconds: get_env_or("TOR_CONTROL_TIMEOUT", "30")
                    .parse()
                    .map_err(|_| {
                        Error::InvalidConfig("TOR_CONTROL_TIMEOUT must be a valid number".into())
                    })?,
                auto_rotate_after_request: parse_bool(&get_env_or(
                    "TOR_SWITCH_IDENTITY_AFTER_REQUEST",
                    "true",
                ))
                .ok_or_else(|| {
                    Error::InvalidConfig(
                        "TOR_SWITCH_IDENTITY_AFTER_REQUEST must be a boolean".into(),
                    )
                })?,
                default_timeout_seconds: get_env_or("PROXY_TIMEOUT", "30").parse().map_err(
                    |_| Error::InvalidConfig("PROXY_TIMEOUT must be a valid number".into()),
                )?,
                identity_refresh_policy,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

/// INI-style booleans: true/false, 1/0, yes/no, on/off
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
