//! HTTP header source.
//!
//! Endpoints, relative to the base URL:
//! - `GET /header/best` returns one raw header
//! - `GET /headers/{hash}/backward?count={n}` returns up to `n` raw headers,
//!   newest first, starting with `{hash}`

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::BlockHash;
use reqwest::{Client, ClientBuilder};

use super::HeaderSource;
use crate::error::{NetworkError, NetworkResult};

/// [`HeaderSource`] over plain HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpHeaderSource {
    client: Client,
    base_url: String,
}

impl HttpHeaderSource {
    /// Create a source for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> NetworkResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(NetworkError::InvalidUrl(base_url));
        }

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .use_rustls_tls()
            .user_agent(concat!("chain-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Request {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn best_header_url(&self) -> String {
        format!("{}/header/best", self.base_url)
    }

    fn backward_url(&self, from: &BlockHash, count: u32) -> String {
        format!("{}/headers/{}/backward?count={}", self.base_url, from, count)
    }

    async fn get_bytes(&self, url: String) -> NetworkResult<Vec<u8>> {
        tracing::trace!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await.map_err(|e| classify(&url, e))?;
        Ok(body.to_vec())
    }
}

fn classify(url: &str, error: reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        NetworkError::Timeout(url.to_string())
    } else {
        NetworkError::Request {
            url: url.to_string(),
            source: error,
        }
    }
}

#[async_trait]
impl HeaderSource for HttpHeaderSource {
    async fn fetch_best_header(&self) -> NetworkResult<Vec<u8>> {
        self.get_bytes(self.best_header_url()).await
    }

    async fn fetch_headers_backward(
        &self,
        from: &BlockHash,
        count: u32,
    ) -> NetworkResult<Vec<u8>> {
        self.get_bytes(self.backward_url(from, count)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_urls() {
        let source =
            HttpHeaderSource::new("https://headers.example.org/v1/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(source.base_url(), "https://headers.example.org/v1");
        assert_eq!(source.best_header_url(), "https://headers.example.org/v1/header/best");

        let hash = BlockHash::all_zeros();
        assert_eq!(
            source.backward_url(&hash, 1000),
            format!("https://headers.example.org/v1/headers/{}/backward?count=1000", "0".repeat(64))
        );
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = HttpHeaderSource::new("ftp://example.org", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let source =
            HttpHeaderSource::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(source.fetch_best_header().await.is_err());
    }
}
