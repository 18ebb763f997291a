// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::feed::FeedFetcher;
use crate::gateway::{MapGateway, MapName};
use crate::record::{decode_feed, DecodedFeed, FeedRecord};
use crate::retry::RetryPolicy;
use crate::uploader::{ChunkUploader, UploadStrategy, UploadSummary};

/// Tunables of a single map refresh.
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub strategy: UploadStrategy,
    /// Policy wrapped around the existence check and creation.
    pub map_retry: RetryPolicy,
    /// Pause between the purge and the first upload.
    pub purge_settle: Duration,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            strategy: UploadStrategy::Bulk,
            map_retry: RetryPolicy::default(),
            purge_settle: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub records: usize,
    pub skipped: usize,
    /// Whether the appliance acknowledged the purge with 202.
    pub purge_acknowledged: bool,
    pub upload: UploadSummary,
}

/// What happened to one map during one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to load; the appliance was not contacted.
    NoRecords { skipped: usize },
    /// The map could not be provisioned within the retry budget.
    MapUnavailable,
    /// An appliance call failed after provisioning.
    Failed,
    Synced(CycleReport),
}

/// Refreshes one reference map from its feed: fetch, decode, provision, purge, reload.
pub struct SyncCycle {
    fetcher: Arc<dyn FeedFetcher>,
    gateway: Arc<dyn MapGateway>,
    uploader: ChunkUploader,
    feeds: HashMap<MapName, String>,
    settings: CycleSettings,
}

impl SyncCycle {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        gateway: Arc<dyn MapGateway>,
        uploader: ChunkUploader,
        feeds: HashMap<MapName, String>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            fetcher,
            gateway,
            uploader,
            feeds,
            settings,
        }
    }

    pub async fn run(&self, map: &MapName) -> CycleOutcome {
        let payload = self.fetch(map).await;
        let DecodedFeed { records, skipped } = decode_feed(&payload);
        info!(map = %map, skipped, "Available {} records for load", records.len());
        if records.is_empty() {
            return CycleOutcome::NoRecords { skipped };
        }

        match self.reload(map, records, skipped).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(map = %map, "Sync cycle failed: {e}");
                CycleOutcome::Failed
            }
        }
    }

    /// Fetch failures are logged and read as an empty feed.
    async fn fetch(&self, map: &MapName) -> Bytes {
        let Some(url) = self.feeds.get(map) else {
            error!(map = %map, "No feed configured for reference map");
            return Bytes::new();
        };
        match self.fetcher.fetch(url).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(map = %map, "Failed to fetch feed: {e}");
                Bytes::new()
            }
        }
    }

    async fn reload(
        &self,
        map: &MapName,
        records: Vec<FeedRecord>,
        skipped: usize,
    ) -> Result<CycleOutcome, SyncError> {
        info!(map = %map, "Ensuring reference map exists");
        let gateway = self.gateway.as_ref();
        let retry = self.settings.map_retry;
        if let Err(e) = retry
            .run("reference map provisioning", move |_| gateway.ensure_map(map))
            .await
        {
            error!(
                map = %map,
                attempts = retry.max_attempts,
                "Failed to provision reference map: {e}"
            );
            return Ok(CycleOutcome::MapUnavailable);
        }

        info!(map = %map, "Purging reference map");
        let purge_acknowledged = gateway.purge_map(map).await?;
        debug!(map = %map, settle = ?self.settings.purge_settle, "Waiting for purge to settle");
        sleep(self.settings.purge_settle).await;

        let count = records.len();
        let upload = self
            .uploader
            .upload(map, records, self.settings.strategy)
            .await;
        info!(
            map = %map,
            chunks = upload.chunks,
            failed_chunks = upload.failed_chunks,
            "Finished loading {count} records"
        );
        Ok(CycleOutcome::Synced(CycleReport {
            records: count,
            skipped,
            purge_acknowledged,
            upload,
        }))
    }
}
