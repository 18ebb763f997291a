// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::prelude::*;

use threat_map_sync::config::SyncConfig;
use threat_map_sync::logger::{self, LogFileSettings, RollingFile};
use threat_map_sync::service::build_scheduler;

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("TI_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let log_file = LogFileSettings::from_env()
        .and_then(|settings| settings.as_ref().map(RollingFile::open).transpose());
    let file_layer = log_file.as_ref().ok().cloned().flatten().map(|file| {
        tracing_subscriber::fmt::layer()
            .event_format(logger::Formatter)
            .with_writer(file)
    });

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::registry()
        .with(logger::env_filter(&log_level).expect("could not parse log level in configuration"))
        .with(tracing_subscriber::fmt::layer().event_format(logger::Formatter))
        .with(file_layer);

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = log_file {
        error!("Error setting up log file: {e}. Shutting down threat map sync.");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading config: {e}. Shutting down threat map sync.");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let scheduler = match build_scheduler(&config, cancel.clone()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Error starting threat map sync: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(wait_for_shutdown(cancel));

    let passes = scheduler.run().await;
    info!(passes, "Threat map sync stopped");
    ExitCode::SUCCESS
}

/// Cancels `cancel` on SIGINT, or SIGTERM on unix.
async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Unable to listen for SIGINT: {e}");
                    return;
                }
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {e}");
            return;
        }
        info!("Received SIGINT");
    }

    cancel.cancel();
}
