//! Proxy control channel
//!
//! Speaks the line-oriented control protocol (Tor's ControlPort) just far
//! enough to authenticate and request a new identity:
//!
//! ```text
//! C: AUTHENTICATE "<secret>"
//! S: 250 OK
//! C: signal NEWNYM
//! S: 250 OK
//! ```

mod reply;

pub use reply::{
    authenticate_command, is_data_terminator, LineKind, ReplyLine, NEWNYM_COMMAND, OK_CODE,
};

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::config::ProxyConfig;
use crate::error::ControlError;
use crate::proxy::transport::format_tcp_addr;

/// Connect and per-reply timeout used when none is configured
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest reply line read before giving up on the peer
const MAX_REPLY_LEN: u64 = 1024;

/// Most lines accepted in one reply, data block lines included
const MAX_REPLY_LINES: usize = 64;

/// Something that can make the proxy switch to a new network identity
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    /// Request a new identity. A failure means the rotation did not happen.
    async fn rotate(&self) -> Result<(), ControlError>;

    /// Human-readable target of the rotation, for logs
    fn endpoint(&self) -> String;
}

/// Control-port client for a single proxy
#[derive(Clone)]
pub struct TorControl {
    host: String,
    port: u16,
    secret: String,
    timeout: Duration,
}

impl TorControl {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            secret: secret.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.control_host.clone(),
            config.control_port,
            config.control_secret.clone(),
            config.control_timeout(),
        )
    }

    /// Authenticate and send `signal NEWNYM` over a fresh connection.
    ///
    /// The connection is closed before returning, whatever the outcome.
    #[instrument(skip(self), fields(control = %format_tcp_addr(&self.host, self.port)))]
    pub async fn new_identity(&self) -> Result<(), ControlError> {
        // Validate before dialing so a bad secret never reaches the wire.
        let auth_line = authenticate_command(&self.secret)?;

        let mut session = ControlSession::open(&self.host, self.port, self.timeout).await?;
        let result = session.rotate(&auth_line).await;
        session.close().await;

        if result.is_ok() {
            info!("New identity requested");
        }
        result
    }
}

impl std::fmt::Debug for TorControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorControl")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityRotator for TorControl {
    async fn rotate(&self) -> Result<(), ControlError> {
        self.new_identity().await
    }

    fn endpoint(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }
}

/// Rotate the identity of the proxy controlled at `host:port`
pub async fn rotate(host: &str, port: u16, secret: &str) -> Result<(), ControlError> {
    TorControl::new(host, port, secret, DEFAULT_CONTROL_TIMEOUT)
        .new_identity()
        .await
}

/// One authenticate + signal exchange over one connection
struct ControlSession {
    reader: BufReader<TcpStream>,
    timeout: Duration,
}

impl ControlSession {
    async fn open(host: &str, port: u16, io_timeout: Duration) -> Result<Self, ControlError> {
        let addr = format_tcp_addr(host, port);
        debug!("Connecting to control port at {}", addr);

        let stream = timeout(io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ControlError::Timeout)?
            .map_err(|e| ControlError::ConnectFailed(format!("{}: {}", addr, e)))?;

        Ok(Self {
            reader: BufReader::new(stream),
            timeout: io_timeout,
        })
    }

    async fn rotate(&mut self, auth_line: &str) -> Result<(), ControlError> {
        let reply = self.command(auth_line).await?;
        if !reply.is_ok() {
            return Err(ControlError::AuthFailed(reply.to_string()));
        }
        debug!("Authenticated to control port");

        let reply = self.command(NEWNYM_COMMAND).await?;
        if !reply.is_ok() {
            return Err(ControlError::SignalFailed(reply.to_string()));
        }
        debug!("NEWNYM accepted");

        Ok(())
    }

    /// Send one command line and read its complete reply
    async fn command(&mut self, line: &str) -> Result<ReplyLine, ControlError> {
        timeout(self.timeout, self.reader.get_mut().write_all(line.as_bytes()))
            .await
            .map_err(|_| ControlError::Timeout)?
            .map_err(|e| ControlError::ConnectFailed(format!("write failed: {}", e)))?;

        self.read_reply().await
    }

    /// Read lines up to and including the end line of one reply.
    ///
    /// The end line carries the status of the whole reply.
    async fn read_reply(&mut self) -> Result<ReplyLine, ControlError> {
        let mut lines = 0;
        while lines < MAX_REPLY_LINES {
            let reply = ReplyLine::parse(&self.read_line().await?)?;
            lines += 1;

            match reply.kind {
                LineKind::End => return Ok(reply),
                LineKind::Mid => {}
                LineKind::Data => {
                    while lines < MAX_REPLY_LINES {
                        lines += 1;
                        if is_data_terminator(&self.read_line().await?) {
                            break;
                        }
                    }
                }
            }
        }

        Err(ControlError::MalformedResponse(format!(
            "reply longer than {} lines",
            MAX_REPLY_LINES
        )))
    }

    async fn read_line(&mut self) -> Result<String, ControlError> {
        let mut buf = Vec::new();
        let n = timeout(
            self.timeout,
            (&mut self.reader)
                .take(MAX_REPLY_LEN)
                .read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| ControlError::Timeout)?
        .map_err(|e| ControlError::ConnectFailed(format!("read failed: {}", e)))?;

        if n == 0 {
            return Err(ControlError::ConnectFailed(
                "connection closed by control port".to_string(),
            ));
        }

        String::from_utf8(buf).map_err(|e| {
            let lossy = String::from_utf8_lossy(e.as_bytes());
            ControlError::MalformedResponse(lossy.trim_end().to_string())
        })
    }

    async fn close(self) {
        let mut stream = self.reader.into_inner();
        if let Err(e) = stream.shutdown().await {
            debug!("Control connection shutdown: {}", e);
        }
    }
}
