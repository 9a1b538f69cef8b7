//! REST execution for a [`Node`](super::Node).
//!
//! The teacher crate this library is descended from only *built*
//! [`http::Request`] values and left execution to the embedder's own HTTP
//! client. This crate's [`Node::request`](super::Node::request) must
//! perform the call itself (the embedder no longer necessarily has an
//! HTTP client of its own to reuse), so it executes requests with
//! `reqwest`.

use super::Node;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

/// Per-request overrides for [`Node::request`](super::Node::request).
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestOptions<'a> {
    /// Additional headers, layered on top of
    /// [`NodeConfig::default_request_headers`](super::NodeConfig::default_request_headers).
    pub headers: Option<&'a [(&'a str, &'a str)]>,
    /// Query parameters, percent-encoded and appended to the route.
    pub query: Option<&'a [(&'a str, &'a str)]>,
    /// JSON request body.
    pub body: Option<&'a serde_json::Value>,
    /// Timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Error produced by a REST call issued through
/// [`Node::request`](super::Node::request).
#[derive(Debug)]
#[non_exhaustive]
pub enum RequestError {
    /// The underlying HTTP transport failed (connection refused, TLS
    /// error, timed out, ...).
    Transport {
        /// Reason for the error.
        source: reqwest::Error,
    },
    /// The node responded with a non-success status code.
    Status {
        /// Status code returned.
        status: u16,
        /// Response body, if any, for diagnostics.
        body: String,
    },
    /// The response body was not valid JSON, or did not match the
    /// expected shape.
    InvalidBody {
        /// Reason for the error.
        source: serde_json::Error,
    },
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Transport { source } => Display::fmt(source, f),
            Self::Status { status, .. } => write!(f, "node responded with status {status}"),
            Self::InvalidBody { .. } => f.write_str("failed to parse response body as JSON"),
        }
    }
}

impl StdError for RequestError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport { source } => Some(source),
            Self::InvalidBody { source } => Some(source),
            Self::Status { .. } => None,
        }
    }
}

pub(super) async fn execute<T: serde::de::DeserializeOwned>(
    node: &Node,
    method: reqwest::Method,
    route: &str,
    options: RequestOptions<'_>,
) -> Result<T, RequestError> {
    let config = node.config();
    let mut url = format!("{}{route}", config.http_base_url());

    if let Some(query) = options.query.filter(|q| !q.is_empty()) {
        url.push('?');
        let mut pairs = query.iter();
        if let Some((key, value)) = pairs.next() {
            push_query_pair(&mut url, key, value);
        }
        for (key, value) in pairs {
            url.push('&');
            push_query_pair(&mut url, key, value);
        }
    }

    let mut request = node.http().request(method, url).header("Authorization", &config.password);

    for (key, value) in &config.default_request_headers {
        request = request.header(key.as_str(), value.as_str());
    }
    if let Some(headers) = options.headers {
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
    }

    if let Some(body) = options.body {
        request = request.header("Content-Type", "application/json").json(body);
    }

    let timeout_ms = options.timeout_ms.unwrap_or(config.default_request_timeout_ms);
    request = request.timeout(Duration::from_millis(timeout_ms));

    let response = request.send().await.map_err(|source| RequestError::Transport { source })?;
    let status = response.status();

    if status.as_u16() == 204 {
        return serde_json::from_value(serde_json::Value::Null).map_err(|source| RequestError::InvalidBody { source });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RequestError::Status { status: status.as_u16(), body });
    }

    let body = response.text().await.map_err(|source| RequestError::Transport { source })?;
    serde_json::from_str(&body).map_err(|source| RequestError::InvalidBody { source })
}

fn push_query_pair(url: &mut String, key: &str, value: &str) {
    #[cfg(feature = "http-support")]
    {
        url.push_str(&percent_encoding::utf8_percent_encode(key, percent_encoding::NON_ALPHANUMERIC).to_string());
        url.push('=');
        url.push_str(&percent_encoding::utf8_percent_encode(value, percent_encoding::NON_ALPHANUMERIC).to_string());
    }
    #[cfg(not(feature = "http-support"))]
    {
        url.push_str(key);
        url.push('=');
        url.push_str(value);
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestError, RequestOptions};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(RequestError: Debug, Send, Sync, std::error::Error);
    assert_impl_all!(RequestOptions<'static>: Clone, Copy, Debug, Send, Sync);

    #[test]
    fn push_query_pair_percent_encodes_when_http_support_enabled() {
        let mut url = String::new();
        super::push_query_pair(&mut url, "identifier", "ytsearch:a b");
        #[cfg(feature = "http-support")]
        assert_eq!("identifier=ytsearch%3Aa%20b", url);
        #[cfg(not(feature = "http-support"))]
        assert_eq!("identifier=ytsearch:a b", url);
    }
}
