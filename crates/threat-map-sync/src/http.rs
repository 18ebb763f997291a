// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;

use crate::error::SyncError;

/// Options shared by every client built for one remote endpoint.
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    /// Hard cutoff applied to the whole request, body included.
    pub timeout: Duration,
    pub proxy_url: Option<String>,
    /// Skips TLS certificate validation.
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            proxy_url: None,
            accept_invalid_certs: false,
        }
    }
}

/// Creates a reqwest client builder using rustls.
pub fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls()
}

/// Builds a client carrying `headers` on every request.
pub fn build_client(options: &HttpClientOptions, headers: HeaderMap) -> Result<Client, SyncError> {
    let mut builder = create_reqwest_client_builder()
        .timeout(options.timeout)
        .default_headers(headers)
        .danger_accept_invalid_certs(options.accept_invalid_certs);
    if let Some(proxy) = &options.proxy_url {
        let proxy = reqwest::Proxy::https(proxy)
            .map_err(|e| SyncError::Client(format!("invalid proxy {proxy}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| SyncError::Client(e.to_string()))
}

/// Inserts a header, rejecting values that are not valid header text.
pub fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), SyncError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| SyncError::InvalidConfig(format!("invalid value for header {name}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Detail captured from a response the caller did not expect.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub status: u16,
    pub body: String,
    pub headers: String,
}

impl Rejection {
    pub(crate) async fn read(response: Response) -> Self {
        let status = response.status().as_u16();
        let headers = format!("{:?}", response.headers());
        let body = response.text().await.unwrap_or_default();
        Self {
            status,
            body,
            headers,
        }
    }

    pub(crate) fn into_error(self, operation: &'static str) -> SyncError {
        SyncError::UnexpectedStatus {
            operation,
            status: self.status,
            body: self.body,
            headers: self.headers,
        }
    }
}

/// Consumes a response the caller did not expect and captures its detail.
pub(crate) async fn unexpected_status(operation: &'static str, response: Response) -> SyncError {
    Rejection::read(response).await.into_error(operation)
}
