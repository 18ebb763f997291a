// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use crate::error::SyncError;
use crate::gateway::{MapGateway, MapName};
use crate::record::FeedRecord;

/// How a chunk is delivered to the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// One bulk load request per chunk.
    #[default]
    Bulk,
    /// One insert request per record, sequential within the chunk.
    Single,
}

impl FromStr for UploadStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bulk" => Ok(UploadStrategy::Bulk),
            "single" => Ok(UploadStrategy::Single),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown upload strategy '{other}', expected bulk or single"
            ))),
        }
    }
}

/// Aggregate of every chunk attempted for one map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub chunks: usize,
    pub failed_chunks: usize,
    pub records: usize,
    /// Records known to be rejected. For a failed bulk chunk this is the whole chunk.
    pub failed_records: usize,
}

/// Splits `items` into contiguous chunks of at most `chunk_size`, keeping order.
pub fn partition<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        chunks.push(items.by_ref().take(chunk_size).collect());
    }
    chunks
}

/// Fans chunk uploads out over tokio tasks, at most `max_concurrent` at a time.
#[derive(Clone)]
pub struct ChunkUploader {
    gateway: Arc<dyn MapGateway>,
    chunk_size: usize,
    max_concurrent: usize,
}

struct ChunkOutcome {
    failed: bool,
    failed_records: usize,
}

impl ChunkUploader {
    pub fn new(gateway: Arc<dyn MapGateway>, chunk_size: usize, max_concurrent: usize) -> Self {
        Self {
            gateway,
            chunk_size: chunk_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Uploads every record and waits for all chunks, successful or not.
    pub async fn upload(
        &self,
        map: &MapName,
        records: Vec<FeedRecord>,
        strategy: UploadStrategy,
    ) -> UploadSummary {
        let mut summary = UploadSummary {
            records: records.len(),
            ..Default::default()
        };
        let chunks = partition(records, self.chunk_size);
        summary.chunks = chunks.len();
        debug!(map = %map, chunks = summary.chunks, ?strategy, "Starting chunk uploads");

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let gateway = Arc::clone(&self.gateway);
            let map = map.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    upload_chunk(gateway.as_ref(), &map, idx, chunk, strategy).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.failed {
                        summary.failed_chunks += 1;
                    }
                    summary.failed_records += outcome.failed_records;
                }
                Err(e) => {
                    error!(map = %map, "Chunk upload task aborted: {e}");
                    summary.failed_chunks += 1;
                }
            }
        }
        summary
    }
}

async fn upload_chunk(
    gateway: &dyn MapGateway,
    map: &MapName,
    idx: usize,
    chunk: Vec<FeedRecord>,
    strategy: UploadStrategy,
) -> ChunkOutcome {
    let size = chunk.len();
    match strategy {
        UploadStrategy::Bulk => {
            info!(map = %map, chunk = idx, size, "Loading chunk in bulk");
            match gateway.upload_bulk(map, &chunk).await {
                Ok(()) => {
                    info!(map = %map, chunk = idx, "Finished bulk load");
                    ChunkOutcome {
                        failed: false,
                        failed_records: 0,
                    }
                }
                Err(e) => {
                    error!(map = %map, chunk = idx, size, "Bulk load failed: {e}");
                    ChunkOutcome {
                        failed: true,
                        failed_records: size,
                    }
                }
            }
        }
        UploadStrategy::Single => {
            info!(map = %map, chunk = idx, size, "Loading chunk one record at a time");
            match gateway.upload_single(map, &chunk).await {
                Ok(report) => {
                    info!(
                        map = %map,
                        chunk = idx,
                        sent = report.sent,
                        failed = report.failed,
                        "Finished record by record load"
                    );
                    ChunkOutcome {
                        failed: report.failed > 0,
                        failed_records: report.failed,
                    }
                }
                Err(e) => {
                    error!(map = %map, chunk = idx, size, "Record by record load failed: {e}");
                    ChunkOutcome {
                        failed: true,
                        failed_records: size,
                    }
                }
            }
        }
    }
}
