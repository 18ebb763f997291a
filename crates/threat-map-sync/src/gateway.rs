// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reference map operations against the SIEM appliance.
//!
//! All calls hang off one base URL (the reference map collection endpoint):
//!
//! | operation      | request                                               | success |
//! |----------------|-------------------------------------------------------|---------|
//! | list maps      | `GET <base>`                                          | 200     |
//! | create map     | `POST <base>?element_type=IP&name=<map>`              | 201     |
//! | purge map      | `DELETE <base>/<map>?purge_only=true`                 | 202     |
//! | bulk load      | `POST <base>/bulk_load/<map>` with `{ip: ip}` body    | 200     |
//! | single insert  | `POST <base>/<map>?key=<ip>&value=<ip>&source=<attr>` | 200     |
//!
//! Every request carries the `SEC` token and a JSON content type.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::http::{build_client, insert_header, unexpected_status, HttpClientOptions, Rejection};
use crate::record::FeedRecord;

/// Name of a reference map on the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapName(String);

impl MapName {
    pub fn new(name: impl Into<String>) -> Result<Self, SyncError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(SyncError::InvalidConfig(
                "reference map name cannot be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of inserting a chunk one record at a time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SingleUploadReport {
    pub sent: usize,
    pub failed: usize,
}

#[async_trait]
pub trait MapGateway: Send + Sync {
    /// Returns whether a map with exactly this name exists.
    async fn map_exists(&self, map: &MapName) -> Result<bool, SyncError>;

    /// Asks the appliance to create the map. `Ok(false)` means the appliance
    /// answered with something other than 201; that answer has been logged.
    async fn create_map(&self, map: &MapName) -> Result<bool, SyncError>;

    /// Creates the map when it is missing.
    async fn ensure_map(&self, map: &MapName) -> Result<(), SyncError> {
        if self.map_exists(map).await? {
            info!(map = %map, "Reference map already exists");
            return Ok(());
        }
        info!(map = %map, "Creating reference map");
        if self.create_map(map).await? {
            info!(map = %map, "Created reference map");
        }
        Ok(())
    }

    /// Removes every entry while keeping the map. `Ok(false)` means the
    /// appliance did not acknowledge the purge with 202.
    async fn purge_map(&self, map: &MapName) -> Result<bool, SyncError>;

    /// Loads a whole chunk with one request.
    async fn upload_bulk(&self, map: &MapName, chunk: &[FeedRecord]) -> Result<(), SyncError>;

    /// Inserts the chunk one record at a time over a single session.
    async fn upload_single(
        &self,
        map: &MapName,
        chunk: &[FeedRecord],
    ) -> Result<SingleUploadReport, SyncError>;
}

#[derive(Deserialize)]
struct MapSummary {
    name: String,
}

/// Builds the bulk load body, one `ip: ip` entry per distinct address.
pub fn bulk_payload(chunk: &[FeedRecord]) -> BTreeMap<&str, &str> {
    let mut payload = BTreeMap::new();
    for record in chunk {
        payload.insert(record.ip(), record.ip());
    }
    payload
}

/// [`MapGateway`] backed by the appliance reference map REST API.
///
/// Each operation opens its own HTTP session so that concurrent chunk uploads
/// never share a connection.
#[derive(Debug, Clone)]
pub struct ReferenceMapClient {
    base_url: Url,
    headers: HeaderMap,
    options: HttpClientOptions,
}

impl ReferenceMapClient {
    pub fn new(base_url: &str, token: &str, options: HttpClientOptions) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "sec", token)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Self {
            base_url,
            headers,
            options,
        };
        // fail fast on TLS or proxy problems instead of on the first chunk
        client.session()?;
        Ok(client)
    }

    fn session(&self) -> Result<Client, SyncError> {
        build_client(&self.options, self.headers.clone())
    }

    fn map_url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }
}

#[async_trait]
impl MapGateway for ReferenceMapClient {
    async fn map_exists(&self, map: &MapName) -> Result<bool, SyncError> {
        let response = self.session()?.get(self.base_url.clone()).send().await?;
        if response.status() != StatusCode::OK {
            return Err(unexpected_status("map listing", response).await);
        }
        let body = response.bytes().await?;
        let maps: Vec<MapSummary> = serde_json::from_slice(&body)?;
        debug!(map = %map, listed = maps.len(), "Listed reference maps");
        Ok(maps.iter().any(|summary| summary.name == map.as_str()))
    }

    async fn create_map(&self, map: &MapName) -> Result<bool, SyncError> {
        let response = self
            .session()?
            .post(self.base_url.clone())
            .query(&[("element_type", "IP"), ("name", map.as_str())])
            .send()
            .await?;
        if response.status() == StatusCode::CREATED {
            return Ok(true);
        }
        let rejection = Rejection::read(response).await;
        error!(
            map = %map,
            status = rejection.status,
            headers = %rejection.headers,
            "Failed to create reference map: {}",
            rejection.body
        );
        Ok(false)
    }

    async fn purge_map(&self, map: &MapName) -> Result<bool, SyncError> {
        let response = self
            .session()?
            .delete(self.map_url(&[map.as_str()])?)
            .query(&[("purge_only", "true")])
            .send()
            .await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(true);
        }
        let rejection = Rejection::read(response).await;
        error!(
            map = %map,
            status = rejection.status,
            headers = %rejection.headers,
            "Failed to purge reference map: {}",
            rejection.body
        );
        Ok(false)
    }

    async fn upload_bulk(&self, map: &MapName, chunk: &[FeedRecord]) -> Result<(), SyncError> {
        let url = self.map_url(&["bulk_load", map.as_str()])?;
        let response = self
            .session()?
            .post(url)
            .json(&bulk_payload(chunk))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(unexpected_status("bulk load", response).await);
        }
        Ok(())
    }

    async fn upload_single(
        &self,
        map: &MapName,
        chunk: &[FeedRecord],
    ) -> Result<SingleUploadReport, SyncError> {
        let url = self.map_url(&[map.as_str()])?;
        let session = self.session()?;
        let mut report = SingleUploadReport::default();
        for record in chunk {
            let source = record.source_attribution();
            let sent = session
                .post(url.clone())
                .query(&[
                    ("key", record.ip()),
                    ("value", record.ip()),
                    ("source", source.as_str()),
                ])
                .send()
                .await;
            match sent {
                Ok(response) if response.status() == StatusCode::OK => report.sent += 1,
                Ok(response) => {
                    report.failed += 1;
                    let rejection = Rejection::read(response).await;
                    error!(
                        map = %map,
                        ip = record.ip(),
                        status = rejection.status,
                        headers = %rejection.headers,
                        "Failed to insert record: {}",
                        rejection.body
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(map = %map, ip = record.ip(), "Failed to insert record: {e}");
                }
            }
        }
        Ok(report)
    }
}
