//! Newnym - Entry Point
//!
//! Fetches one URL through the configured proxy and prints the result
//! snapshot as JSON.
//!
//! Usage: `newnym <url> [suffix] [timeout-seconds]`

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newnym::config::{Config, LogConfig};
use newnym::error::{Error, Result};
use newnym::{FetchRequest, ProxySession};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);
    info!("Configuration loaded");

    let request = request_from_args(std::env::args().skip(1))?;

    let session = ProxySession::new(config.proxy);
    let proxy_config = session.config();
    info!(
        "Using {} proxy {} (control {}, rotate after request: {}, identity refresh: {})",
        proxy_config.proxy_protocol.as_str(),
        session.proxy_address(),
        proxy_config.control_address(),
        proxy_config.auto_rotate_after_request,
        proxy_config.identity_refresh_policy.as_str()
    );

    if let Err(e) = session.fetch(request).await {
        warn!("Fetch failed: {}", e);
        return Err(e.into());
    }

    if let Some(result) = session.last_result() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("newnym={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn request_from_args(mut args: impl Iterator<Item = String>) -> Result<FetchRequest> {
    let url = args
        .next()
        .ok_or_else(|| Error::MissingArgument("usage: newnym <url> [suffix] [timeout]".into()))?;

    let mut request = FetchRequest::new(url);
    if let Some(suffix) = args.next() {
        request = request.with_suffix(suffix);
    }
    if let Some(timeout) = args.next() {
        let seconds = timeout.parse().map_err(|_| {
            Error::InvalidConfig(format!("timeout must be a number of seconds: {}", timeout))
        })?;
        request = request.with_timeout(seconds);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_request_from_args() {
        let request = request_from_args(args(&["http://example.com/", "?q=1", "9"])).unwrap();
        assert_eq!(request.target_url, "http://example.com/");
        assert_eq!(request.url_suffix, "?q=1");
        assert_eq!(request.timeout_seconds, Some(9));

        let request = request_from_args(args(&["http://example.com/"])).unwrap();
        assert_eq!(request.url_suffix, "");
        assert_eq!(request.timeout_seconds, None);
    }

    #[test]
    fn test_request_from_args_errors() {
        assert!(matches!(
            request_from_args(args(&[])),
            Err(Error::MissingArgument(_))
        ));
        assert!(matches!(
            request_from_args(args(&["http://example.com/", "", "soon"])),
            Err(Error::InvalidConfig(_))
        ));
    }
}
