// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncConfig;
use crate::cycle::SyncCycle;
use crate::error::SyncError;
use crate::feed::HttpFeedFetcher;
use crate::gateway::{MapGateway, ReferenceMapClient};
use crate::scheduler::Scheduler;
use crate::uploader::ChunkUploader;

/// Wires the feed fetcher, reference map client, uploader and cycle behind a scheduler.
///
/// Fails on configuration the HTTP clients cannot be built from, before any network call.
pub fn build_scheduler(
    config: &SyncConfig,
    cancel: CancellationToken,
) -> Result<Scheduler, SyncError> {
    config.validate()?;

    let fetcher = Arc::new(HttpFeedFetcher::new(
        &config.feed_api_key,
        &config.feed_http_options(),
    )?);
    let gateway: Arc<dyn MapGateway> = Arc::new(ReferenceMapClient::new(
        &config.siem_url,
        &config.siem_token,
        config.siem_http_options(),
    )?);
    let uploader = ChunkUploader::new(
        Arc::clone(&gateway),
        config.chunk_size,
        config.max_concurrent_uploads,
    );
    let cycle = SyncCycle::new(
        fetcher,
        gateway,
        uploader,
        config.feed_urls(),
        config.cycle_settings(),
    );
    debug!(
        maps = config.enabled_maps.len(),
        strategy = ?config.strategy,
        "Sync engine assembled"
    );

    Ok(Scheduler::new(
        Arc::new(cycle),
        config.enabled_maps.clone(),
        config.scheduler_settings(),
        cancel,
    ))
}
