//! Proxy session manager
//!
//! Runs fetches through the configured proxy with a fresh client identity
//! each time, keeps the last result, and asks the control port for a new
//! network identity after each fetch when configured to.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{IdentityRefreshPolicy, ProxyConfig};
use crate::control::{IdentityRotator, TorControl};
use crate::error::{ControlError, FetchError};
use crate::identity::IdentityGenerator;
use crate::models::{FetchRequest, FetchResult};
use crate::proxy::client::HttpFetcher;
use crate::proxy::transport::ProxyTransport;

struct SessionState {
    generator: IdentityGenerator,
    identity: Option<String>,
    last_result: Option<FetchResult>,
}

impl SessionState {
    fn refresh_identity(&mut self) -> String {
        let identity = self.generator.generate();
        self.identity = Some(identity.clone());
        identity
    }
}

/// A proxied HTTP client with identity rotation.
///
/// Fetches on one session run one at a time; concurrent callers wait for the
/// fetch in progress (including its rotation) to finish. Sessions are plain
/// values: a process that wants a single shared session holds it in an `Arc`.
pub struct ProxySession {
    config: ProxyConfig,
    fetcher: HttpFetcher,
    rotator: Arc<dyn IdentityRotator>,
    state: Mutex<SessionState>,
    in_flight: tokio::sync::Mutex<()>,
}

impl ProxySession {
    /// Session rotating through the control port named in `config`
    pub fn new(config: ProxyConfig) -> Self {
        let rotator = Arc::new(TorControl::from_config(&config));
        Self::with_parts(config, IdentityGenerator::new(), rotator)
    }

    pub fn with_parts(
        config: ProxyConfig,
        generator: IdentityGenerator,
        rotator: Arc<dyn IdentityRotator>,
    ) -> Self {
        let fetcher = HttpFetcher::new(ProxyTransport::new(&config));
        Self {
            config,
            fetcher,
            rotator,
            state: Mutex::new(SessionState {
                generator,
                identity: None,
                last_result: None,
            }),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn proxy_address(&self) -> String {
        self.config.proxy_address()
    }

    /// Identity most recently generated for this session
    pub fn current_identity(&self) -> Option<String> {
        self.state.lock().identity.clone()
    }

    /// Snapshot of the last successful fetch
    pub fn last_result(&self) -> Option<FetchResult> {
        self.state.lock().last_result.clone()
    }

    /// Fetch `target_url + url_suffix` through the proxy.
    ///
    /// On success the result replaces the stored one. A failed post-fetch
    /// rotation is logged and does not affect the returned result.
    #[instrument(skip(self, request), fields(target = %request.target_url))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
        let _in_flight = self.in_flight.lock().await;

        let resolved_url = normalize_target_url(&request.target_url);
        let user_agent = self.state.lock().refresh_identity();
        let payload = format!("{}{}", resolved_url, request.url_suffix);
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_seconds);

        let url = Url::parse(&payload)?;
        debug!(%payload, %user_agent, timeout_seconds, "Fetching through proxy");

        let response = timeout(
            fetch_timeout(timeout_seconds),
            self.fetcher.get(&url, &user_agent),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        let result = FetchResult {
            resolved_url,
            user_agent,
            timeout_seconds,
            proxy_address: self.proxy_address(),
            payload,
            status: response.status,
            body: response.raw,
            fetched_at: Utc::now(),
        };
        self.state.lock().last_result = Some(result.clone());

        info!(
            status = result.status,
            bytes = result.body.len(),
            proxy = %result.proxy_address,
            "Fetch complete"
        );

        if self.config.auto_rotate_after_request {
            if let Err(e) = self.rotate_and_refresh().await {
                warn!(
                    control = %self.rotator.endpoint(),
                    error = %e,
                    "Identity rotation after fetch failed"
                );
            }
        } else {
            self.state.lock().refresh_identity();
        }

        Ok(result)
    }

    /// Ask the proxy for a new network identity now.
    ///
    /// Waits for any fetch in progress. The stored client identity is
    /// refreshed according to the configured `IdentityRefreshPolicy`.
    pub async fn rotate_identity(&self) -> Result<(), ControlError> {
        let _in_flight = self.in_flight.lock().await;
        self.rotate_and_refresh().await
    }

    async fn rotate_and_refresh(&self) -> Result<(), ControlError> {
        let outcome = self.rotator.rotate().await;

        let refresh = match (&outcome, self.config.identity_refresh_policy) {
            (Ok(()), _) => true,
            (Err(_), IdentityRefreshPolicy::Always) => true,
            (Err(_), IdentityRefreshPolicy::OnSuccess) => false,
        };
        if refresh {
            self.state.lock().refresh_identity();
        }

        outcome
    }
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("proxy", &self.proxy_address())
            .field("control", &self.rotator.endpoint())
            .field("auto_rotate", &self.config.auto_rotate_after_request)
            .finish_non_exhaustive()
    }
}

/// Percent-encode literal spaces; nothing else is touched
pub fn normalize_target_url(url: &str) -> String {
    url.replace(' ', "%20")
}

fn fetch_timeout(seconds: u32) -> Duration {
    Duration::from_secs(u64::from(seconds.max(1)))
}
