// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps SIEM reference maps in sync with threat-intelligence IP feeds.
//!
//! Each pass fetches every enabled feed, decodes its newline-delimited JSON
//! records, makes sure the target reference map exists, purges it and reloads
//! it in chunks uploaded concurrently. Passes repeat on a fixed interval until
//! the scheduler's cancellation token fires.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod cycle;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod http;
pub mod logger;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod uploader;
