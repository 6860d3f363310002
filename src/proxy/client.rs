//! HTTP GET over a proxied connection
//!
//! Returns the raw transfer (status line, headers and body), the way a
//! header-including client dump would print it.

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, CONNECTION, HOST, LOCATION, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::{Request, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::error::FetchError;
use crate::proxy::transport::{ProxyTransport, Target};

/// Redirect hops followed automatically
pub const MAX_REDIRECTS: usize = 1;

/// Outcome of a GET, after at most one redirect
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Final status code
    pub status: u16,
    /// URL the final response came from
    pub final_url: Url,
    /// Heads of every response followed by the final body
    pub raw: Bytes,
}

/// Issues GET requests through a `ProxyTransport`
#[derive(Clone)]
pub struct HttpFetcher {
    transport: ProxyTransport,
}

impl HttpFetcher {
    pub fn new(transport: ProxyTransport) -> Self {
        Self { transport }
    }

    /// GET `url` with `user_agent`, following a single redirect
    #[instrument(skip(self, url, user_agent), fields(url = %url))]
    pub async fn get(&self, url: &Url, user_agent: &str) -> Result<FetchedResponse, FetchError> {
        let mut current = url.clone();
        let mut raw = BytesMut::new();
        let mut hops = 0;

        loop {
            let response = self.send_once(&current, user_agent).await?;
            raw.extend_from_slice(&response.head);

            let next = match response.location.as_deref() {
                Some(location) if hops < MAX_REDIRECTS && is_redirect(response.status) => {
                    Some(redirect_target(&current, location)?)
                }
                _ => None,
            };

            match next {
                Some(next) => {
                    debug!("Following redirect {} -> {}", current, next);
                    current = next;
                    hops += 1;
                }
                None => {
                    raw.extend_from_slice(&response.body);
                    return Ok(FetchedResponse {
                        status: response.status.as_u16(),
                        final_url: current,
                        raw: raw.freeze(),
                    });
                }
            }
        }
    }

    /// One request/response exchange over a fresh connection
    async fn send_once(&self, url: &Url, user_agent: &str) -> Result<SingleResponse, FetchError> {
        let target = Target::from_url(url)?;
        let absolute_form = self.transport.uses_absolute_form(&target);

        let request = build_request(url, user_agent, absolute_form, &self.transport)?;
        let connection = self.transport.connect(&target).await?;

        let io = hyper_util::rt::TokioIo::new(connection);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FetchError::TransportFailed(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| FetchError::TransportFailed(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| FetchError::TransportFailed(format!("Failed to read response: {}", e)))?
            .to_bytes();

        debug!(status = parts.status.as_u16(), bytes = body.len(), "Response received");

        Ok(SingleResponse {
            status: parts.status,
            location: parts
                .headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            head: render_head(&parts),
            body,
        })
    }
}

struct SingleResponse {
    status: StatusCode,
    location: Option<String>,
    head: Vec<u8>,
    body: Bytes,
}

fn build_request(
    url: &Url,
    user_agent: &str,
    absolute_form: bool,
    transport: &ProxyTransport,
) -> Result<Request<Empty<Bytes>>, FetchError> {
    let uri = if absolute_form {
        url.as_str().to_string()
    } else {
        origin_form(url)
    };

    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header(HOST, host_header(url))
        .header(USER_AGENT, user_agent)
        .header(ACCEPT, "*/*")
        .header(CONNECTION, "close");

    if absolute_form {
        if let Some(value) = transport.proxy_authorization() {
            builder = builder.header(PROXY_AUTHORIZATION, value);
        }
    }

    builder
        .body(Empty::new())
        .map_err(|e| FetchError::InvalidUrl(format!("Failed to build request: {}", e)))
}

/// Path and query of `url`, as sent to an origin server
fn origin_form(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Resolve a `Location` header against the URL that returned it.
///
/// A location that cannot be followed is a fault of the server, not of the
/// requested URL.
fn redirect_target(base: &Url, location: &str) -> Result<Url, FetchError> {
    let next = base.join(location).map_err(|e| {
        FetchError::TransportFailed(format!("invalid redirect location '{}': {}", location, e))
    })?;

    match next.scheme() {
        "http" | "https" => Ok(next),
        other => Err(FetchError::TransportFailed(format!(
            "redirect to unsupported scheme: {}",
            other
        ))),
    }
}

/// Status line and headers, CRLF-terminated, ending with the blank line
fn render_head(parts: &http::response::Parts) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(
        format!(
            "{:?} {} {}\r\n",
            parts.version,
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );

    for (name, value) in &parts.headers {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(b"\r\n");
    head
}
