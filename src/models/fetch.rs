use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// A fetch to perform through the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub target_url: String,
    /// Appended verbatim to the normalized target URL
    pub url_suffix: String,
    /// Overrides the configured default timeout when set
    pub timeout_seconds: Option<u32>,
}

impl FetchRequest {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Self::default()
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.url_suffix = suffix.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Snapshot of the last successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    /// Target URL after space encoding
    #[serde(rename = "url")]
    pub resolved_url: String,
    /// Identity sent as User-Agent
    pub user_agent: String,
    #[serde(rename = "timeout")]
    pub timeout_seconds: u32,
    /// Proxy as `host:port`
    #[serde(rename = "proxy")]
    pub proxy_address: String,
    /// `resolved_url` followed by the request's suffix
    pub payload: String,
    /// Status of the final response
    pub status: u16,
    /// Raw transfer: every response head followed by the final body
    #[serde(rename = "return", serialize_with = "serialize_lossy")]
    pub body: Bytes,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    /// Body rendered as text, invalid UTF-8 replaced
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn serialize_lossy<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}
