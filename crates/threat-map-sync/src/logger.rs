// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter used by the sync daemon.
//!
//! # Format
//!
//! ```text
//! <timestamp>  <LEVEL>  <file>  <line>  [span{fields}: ]message fields
//! ```
//!
//! # Examples
//!
//! ```text
//! 2026-03-02T10:00:00.000000Z   INFO  src/cycle.rs  87  Available 1200 records for load map=fs_ti skipped=0
//! 2026-03-02T10:00:12.000000Z  ERROR  src/uploader.rs  147  Bulk load failed: transport error map=fs_ti chunk=1 size=1000
//! ```
//!
//! The same lines can also go to a size-rotated file through [`RollingFile`].

use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::encode::pattern::PatternEncoder;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, fmt, fs, io};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    time::{FormatTime, SystemTime},
    FmtContext, FormattedFields, MakeWriter,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::parse_var;
use crate::error::SyncError;

/// Targets that are too chatty below `warn` to be useful in daemon logs.
const QUIET_TARGETS: &str = "h2=off,hyper=off,hyper_util=off,rustls=off,reqwest=warn";

pub const LOG_FILE_NAME: &str = "threat-map-sync.log";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_MAX_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_LOG_BACKUPS: u32 = 5;

/// Formats events as double-space separated columns with the call site.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        SystemTime.format_time(&mut writer)?;
        write!(
            writer,
            "  {:>5}  {}  {}  ",
            metadata.level(),
            metadata.file().unwrap_or("-"),
            metadata.line().unwrap_or_default()
        )?;

        // root first
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the daemon's filter: `level` for everything else, transport crates kept quiet.
pub fn env_filter(level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_new(format!("{QUIET_TARGETS},{level}"))
}

/// Where the rotated log file lives and how much of it is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileSettings {
    pub dir: PathBuf,
    /// Size past which the current file is rolled to `<name>.1`.
    pub max_bytes: u64,
    /// Rolled files kept, `<name>.1` being the newest.
    pub backups: u32,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
        }
    }
}

impl LogFileSettings {
    /// Reads `TI_LOG_DIR`, `TI_LOG_MAX_BYTES` and `TI_LOG_BACKUPS`.
    ///
    /// An empty `TI_LOG_DIR` turns the file off and yields `None`.
    pub fn from_env() -> Result<Option<Self>, SyncError> {
        let dir = env::var("TI_LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
        if dir.trim().is_empty() {
            return Ok(None);
        }
        let settings = Self {
            dir: PathBuf::from(dir.trim()),
            max_bytes: parse_var("TI_LOG_MAX_BYTES", DEFAULT_LOG_MAX_BYTES)?,
            backups: parse_var("TI_LOG_BACKUPS", DEFAULT_LOG_BACKUPS)?,
        };
        if settings.max_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "TI_LOG_MAX_BYTES must be greater than 0".to_string(),
            ));
        }
        Ok(Some(settings))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }
}

/// [`MakeWriter`] handing each formatted line to a size-rotated log4rs appender.
#[derive(Clone)]
pub struct RollingFile {
    appender: Arc<RollingFileAppender>,
}

impl fmt::Debug for RollingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingFile").finish_non_exhaustive()
    }
}

impl RollingFile {
    /// Creates the log directory if needed and opens the file in append mode.
    pub fn open(settings: &LogFileSettings) -> Result<Self, SyncError> {
        fs::create_dir_all(&settings.dir)
            .map_err(|e| SyncError::LogFile(format!("{}: {e}", settings.dir.display())))?;

        let path = settings.path();
        let roller = FixedWindowRoller::builder()
            .base(1)
            .build(&format!("{}.{{}}", path.display()), settings.backups)
            .map_err(|e| SyncError::LogFile(format!("{}: {e}", path.display())))?;
        let policy = CompoundPolicy::new(
            Box::new(SizeTrigger::new(settings.max_bytes)),
            Box::new(roller),
        );
        // lines arrive already formatted and newline terminated
        let appender = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{m}")))
            .build(&path, Box::new(policy))
            .map_err(|e| SyncError::LogFile(format!("{}: {e}", path.display())))?;

        Ok(Self {
            appender: Arc::new(appender),
        })
    }
}

impl<'a> MakeWriter<'a> for RollingFile {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            appender: Arc::clone(&self.appender),
            buf: Vec::new(),
        }
    }
}

/// Buffers one event and appends it to the rolling file when dropped.
pub struct LineWriter {
    appender: Arc<RollingFileAppender>,
    buf: Vec<u8>,
}

impl io::Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buf);
        let result = self.appender.append(
            &log::Record::builder()
                .args(format_args!("{line}"))
                .level(log::Level::Info)
                .build(),
        );
        // the subscriber is the one being written, so stderr is all that is left
        if let Err(e) = result {
            eprintln!("failed to write log file: {e}");
        }
    }
}
