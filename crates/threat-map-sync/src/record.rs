// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding of the newline-delimited JSON threat feed.
//!
//! Each feed line carries one IP entry:
//!
//! ```text
//! {"ipv4": "1.2.3.4", "category": "c2", "comment": "...", "criminal": true, "country": "NL", "cdn": false}
//! ```
//!
//! Only `ipv4` is required. Lines that fail to decode are skipped by
//! [`decode_feed`] and counted, they never abort the batch.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Rendered in the source attribution when a metadata field is absent.
const MISSING_FIELD: &str = "None";

/// A flag the feed publishes either as a JSON boolean or as free text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Bool(true) => f.write_str("True"),
            Flag::Bool(false) => f.write_str("False"),
            Flag::Text(text) => f.write_str(text),
        }
    }
}

/// One normalized threat feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedRecord {
    #[serde(rename = "ipv4")]
    ip: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    criminal: Option<Flag>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    cdn: Option<Flag>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed feed line: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("feed line has an empty ipv4 key")]
    EmptyIp,
}

impl FeedRecord {
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn criminal(&self) -> Option<&Flag> {
        self.criminal.as_ref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn cdn(&self) -> Option<&Flag> {
        self.cdn.as_ref()
    }

    /// Builds the `source` value attached to a single-record insert.
    pub fn source_attribution(&self) -> String {
        format!(
            "category: {}, comment: {}, criminal: {}, country: {}, cdn: {}",
            Shown(&self.category),
            Shown(&self.comment),
            Shown(&self.criminal),
            Shown(&self.country),
            Shown(&self.cdn),
        )
    }
}

struct Shown<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Shown<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str(MISSING_FIELD),
        }
    }
}

/// Decodes a single feed line.
pub fn decode(line: &[u8]) -> Result<FeedRecord, RecordError> {
    let mut record: FeedRecord = serde_json::from_slice(line)?;
    let ip = record.ip.trim();
    if ip.is_empty() {
        return Err(RecordError::EmptyIp);
    }
    if ip.len() != record.ip.len() {
        record.ip = ip.to_string();
    }
    Ok(record)
}

/// Result of decoding a whole feed payload.
#[derive(Debug, Default)]
pub struct DecodedFeed {
    pub records: Vec<FeedRecord>,
    /// Non-blank lines that could not be decoded.
    pub skipped: usize,
}

/// Splits a feed payload on newlines, drops blank lines and decodes the rest.
pub fn decode_feed(body: &[u8]) -> DecodedFeed {
    let mut decoded = DecodedFeed::default();
    for line in body.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match decode(line) {
            Ok(record) => decoded.records.push(record),
            Err(e) => {
                debug!("Skipping feed line: {e}");
                decoded.skipped += 1;
            }
        }
    }
    if decoded.skipped > 0 {
        warn!(
            skipped = decoded.skipped,
            decoded = decoded.records.len(),
            "Skipped undecodable feed lines"
        );
    }
    decoded
}
