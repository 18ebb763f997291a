// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::cycle::{CycleOutcome, SyncCycle};
use crate::error::SyncError;
use crate::gateway::MapName;

/// Anything able to refresh one map. Implemented by [`SyncCycle`].
#[async_trait]
pub trait MapSync: Send + Sync {
    async fn sync_map(&self, map: &MapName) -> CycleOutcome;
}

#[async_trait]
impl MapSync for SyncCycle {
    async fn sync_map(&self, map: &MapName) -> CycleOutcome {
        self.run(map).await
    }
}

/// What to do when a pass takes longer than the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Wait `interval - elapsed`, or start the next pass right away on overrun.
    #[default]
    Absorb,
    /// Wait `|interval - elapsed|`, so an overrun lengthens the next wait.
    Compound,
}

impl OverrunPolicy {
    pub fn next_wait(self, interval: Duration, elapsed: Duration) -> Duration {
        match self {
            OverrunPolicy::Absorb => interval.saturating_sub(elapsed),
            OverrunPolicy::Compound => interval.abs_diff(elapsed),
        }
    }
}

impl FromStr for OverrunPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "absorb" => Ok(OverrunPolicy::Absorb),
            "compound" => Ok(OverrunPolicy::Compound),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown overrun policy '{other}', expected absorb or compound"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    /// Terminal; entered once cancellation is observed.
    Stopping,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Granularity of the inter-pass wait.
    pub sleep_step: Duration,
    pub overrun: OverrunPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            sleep_step: Duration::from_secs(60),
            overrun: OverrunPolicy::default(),
        }
    }
}

/// Drives one sync pass over every map per interval until cancelled.
pub struct Scheduler {
    sync: Arc<dyn MapSync>,
    maps: Vec<MapName>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        sync: Arc<dyn MapSync>,
        maps: Vec<MapName>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sync,
            maps,
            settings,
            cancel,
        }
    }

    /// Runs passes until cancellation. Returns the number of passes started.
    pub async fn run(&self) -> u64 {
        info!(maps = self.maps.len(), "Started threat map sync scheduler");
        let mut passes = 0;
        let mut state = SchedulerState::Running;
        while state == SchedulerState::Running {
            let started = Instant::now();
            passes += 1;
            state = self.run_pass().await;
            if state == SchedulerState::Stopping {
                break;
            }

            let elapsed = started.elapsed();
            let wait = self
                .settings
                .overrun
                .next_wait(self.settings.interval, elapsed);
            info!(
                "Pass completed in {}s. Next run after {}s",
                elapsed.as_secs(),
                wait.as_secs()
            );
            state = self.pause(wait).await;
        }
        info!("Received exit event. Stopping after {passes} passes");
        passes
    }

    /// Syncs every map in order, stopping before the next map once cancelled.
    pub async fn run_pass(&self) -> SchedulerState {
        for map in &self.maps {
            if self.cancel.is_cancelled() {
                return SchedulerState::Stopping;
            }
            let sync = Arc::clone(&self.sync);
            let target = map.clone();
            // a panicking cycle must not take the scheduler down
            let cycle = async move { sync.sync_map(&target).await };
            match tokio::spawn(cycle.in_current_span()).await {
                Ok(outcome) => log_outcome(map, outcome),
                Err(e) => error!(map = %map, "Sync cycle aborted: {e}"),
            }
        }
        self.state()
    }

    async fn pause(&self, wait: Duration) -> SchedulerState {
        let mut remaining = wait;
        while !remaining.is_zero() {
            let step = if self.settings.sleep_step.is_zero() {
                remaining
            } else {
                remaining.min(self.settings.sleep_step)
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SchedulerState::Stopping,
                _ = sleep(step) => {}
            }
            remaining -= step;
            debug!("Next pass in {}s", remaining.as_secs());
        }
        self.state()
    }

    fn state(&self) -> SchedulerState {
        if self.cancel.is_cancelled() {
            SchedulerState::Stopping
        } else {
            SchedulerState::Running
        }
    }
}

fn log_outcome(map: &MapName, outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Synced(report) => info!(
            map = %map,
            records = report.records,
            skipped = report.skipped,
            failed_chunks = report.upload.failed_chunks,
            purge_acknowledged = report.purge_acknowledged,
            "Reference map refreshed"
        ),
        CycleOutcome::NoRecords { skipped } => {
            info!(map = %map, skipped, "No records to load this pass")
        }
        CycleOutcome::MapUnavailable => warn!(map = %map, "Reference map unavailable this pass"),
        CycleOutcome::Failed => warn!(map = %map, "Reference map refresh failed this pass"),
    }
}
