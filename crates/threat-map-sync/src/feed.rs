// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::time::Instant;
use tracing::debug;

use crate::error::SyncError;
use crate::http::{build_client, insert_header, unexpected_status, HttpClientOptions};

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Downloads the raw feed payload published at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, SyncError>;
}

/// Fetches feeds over HTTP, authenticating with the `Api-Key` header.
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(api_key: &str, options: &HttpClientOptions) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "api-key", api_key)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            client: build_client(options, headers)?,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, SyncError> {
        let started = Instant::now();
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status("feed fetch", response).await);
        }
        let body = response.bytes().await?;
        debug!(
            bytes = body.len(),
            "Fetched feed in {} ms",
            started.elapsed().as_millis()
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_fetch_sends_api_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/ti/ips")
            .match_header("Api-Key", "feed-key")
            .match_header("Content-Type", "application/json")
            .with_status(200)
            .with_body("{\"ipv4\":\"1.2.3.4\"}\n")
            .create_async()
            .await;

        let fetcher = HttpFeedFetcher::new("feed-key", &HttpClientOptions::default()).unwrap();
        let body = fetcher
            .fetch(&format!("{}/ti/ips", server.url()))
            .await
            .unwrap();

        assert_eq!(&body[..], b"{\"ipv4\":\"1.2.3.4\"}\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/ti/ips")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let fetcher = HttpFeedFetcher::new("feed-key", &HttpClientOptions::default()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/ti/ips", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::UnexpectedStatus { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_transport_error() {
        let fetcher = HttpFeedFetcher::new("feed-key", &HttpClientOptions::default()).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:1/feed").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[test]
    fn test_new_rejects_invalid_api_key() {
        let err = HttpFeedFetcher::new("bad\nkey", &HttpClientOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }
}
