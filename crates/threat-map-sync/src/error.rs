// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while talking to the threat feed or the SIEM appliance.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network level failure (DNS, TLS, socket, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote answered with a status the operation does not accept.
    #[error("unexpected status {status} from {operation}: {body} headers={headers}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
        headers: String,
    },

    /// The appliance answered with a body that could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("failed to open log file: {0}")]
    LogFile(String),
}
