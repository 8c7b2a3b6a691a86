//! HTTP downloads for tool acquisition

use crate::errors::{BuildError, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Fetches a URL into memory
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes>;
}

/// reqwest-backed downloader
#[derive(Debug, Clone)]
pub struct ReqwestDownloader {
    client: reqwest::Client,
}

impl ReqwestDownloader {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Some(Duration::from_secs(300)))
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| BuildError::Network {
            message: format!("Failed to create HTTP client: {}", e),
        })?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Downloader for ReqwestDownloader {
    async fn download(&self, url: &str) -> Result<Bytes> {
        debug!("Downloading {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request timeout for URL: {}", url)
            } else if e.is_connect() {
                format!("Connection failed for URL: {}", url)
            } else {
                format!("Request failed for URL: {}: {}", url, e)
            };
            BuildError::Network { message }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BuildError::Network {
                message: format!("HTTP {} for URL: {}", status.as_u16(), url),
            });
        }

        response.bytes().await.map_err(|e| BuildError::Network {
            message: format!("Failed to read response body from {}: {}", url, e),
        })
    }
}

pub mod mock {
    //! Canned-response downloader

    use super::Downloader;
    use crate::errors::{BuildError, Result};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct MockDownloader {
        responses: Arc<Mutex<HashMap<String, Bytes>>>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl MockDownloader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, url: &str, body: impl Into<Bytes>) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), body.into());
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Downloader for MockDownloader {
        async fn download(&self, url: &str) -> Result<Bytes> {
            self.requests.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| BuildError::Network {
                    message: format!("HTTP 404 for URL: {}", url),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/Procdump.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-data".to_vec()))
            .mount(&server)
            .await;

        let downloader = ReqwestDownloader::new().unwrap();
        let body = downloader
            .download(&format!("{}/files/Procdump.zip", server.uri()))
            .await
            .unwrap();
        assert_eq!(&body[..], b"PK-data");
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = ReqwestDownloader::new().unwrap();
        let result = downloader
            .download(&format!("{}/missing.zip", server.uri()))
            .await;
        match result {
            Err(BuildError::Network { message }) => assert!(message.contains("404")),
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_downloader_records_requests() {
        let downloader = mock::MockDownloader::new();
        downloader.respond("https://example.test/a.zip", Bytes::from_static(b"a"));
        assert!(downloader.download("https://example.test/a.zip").await.is_ok());
        assert!(downloader.download("https://example.test/b.zip").await.is_err());
        assert_eq!(downloader.requests().len(), 2);
    }
}
