// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cycle::CycleSettings;
use crate::error::SyncError;
use crate::gateway::MapName;
use crate::http::HttpClientOptions;
use crate::retry::RetryPolicy;
use crate::scheduler::{OverrunPolicy, SchedulerSettings};
use crate::uploader::UploadStrategy;

const DEFAULT_MAP_NAME: &str = "fs_ti";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime configuration of the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Feed URL per reference map, in declared order.
    pub feeds: Vec<(MapName, String)>,
    /// Maps synced each pass, in pass order.
    pub enabled_maps: Vec<MapName>,
    pub feed_api_key: String,
    /// Base URL of the appliance reference-map API.
    pub siem_url: String,
    pub siem_token: String,
    pub interval: Duration,
    pub chunk_size: usize,
    pub strategy: UploadStrategy,
    pub max_concurrent_uploads: usize,
    pub feed_timeout: Duration,
    pub siem_timeout: Duration,
    pub purge_settle: Duration,
    pub map_retry: RetryPolicy,
    pub sleep_step: Duration,
    pub overrun: OverrunPolicy,
    pub accept_invalid_certs: bool,
    pub https_proxy: Option<String>,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            enabled_maps: Vec::new(),
            feed_api_key: String::new(),
            siem_url: String::new(),
            siem_token: String::new(),
            interval: Duration::from_secs(3600),
            chunk_size: 1000,
            strategy: UploadStrategy::Bulk,
            max_concurrent_uploads: 16,
            feed_timeout: Duration::from_secs(30),
            siem_timeout: Duration::from_secs(60),
            purge_settle: Duration::from_secs(10),
            map_retry: RetryPolicy::default(),
            sleep_step: Duration::from_secs(60),
            overrun: OverrunPolicy::Absorb,
            accept_invalid_certs: false,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Create configuration from `TI_*` environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        let defaults = Self::default();

        let feeds = match env::var("TI_FEEDS") {
            Ok(list) => parse_feeds(&list)?,
            Err(_) => {
                let url = required("TI_FEED_URL").map_err(|_| {
                    SyncError::InvalidConfig("TI_FEEDS or TI_FEED_URL must be set".to_string())
                })?;
                let map = env::var("TI_MAP_NAME").unwrap_or_else(|_| DEFAULT_MAP_NAME.to_string());
                vec![(MapName::new(map)?, url)]
            }
        };
        let enabled_maps = match env::var("TI_ENABLED_MAPS") {
            Ok(list) => parse_map_list(&list)?,
            Err(_) => feeds.iter().map(|(map, _)| map.clone()).collect(),
        };
        let strategy = if parse_bool("TI_LOAD_BULK", true)? {
            UploadStrategy::Bulk
        } else {
            UploadStrategy::Single
        };
        let overrun = match env::var("TI_OVERRUN_POLICY") {
            Ok(val) => val.parse()?,
            Err(_) => defaults.overrun,
        };
        let https_proxy = env::var("TI_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok()
            .filter(|proxy| !proxy.trim().is_empty());
        let log_level = env::var("TI_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            feeds,
            enabled_maps,
            feed_api_key: required("TI_FEED_API_KEY")?,
            siem_url: required("TI_SIEM_URL")?,
            siem_token: required("TI_SIEM_TOKEN")?,
            interval: parse_secs("TI_INTERVAL_SECS", defaults.interval)?,
            chunk_size: parse_var("TI_CHUNK_SIZE", defaults.chunk_size)?,
            strategy,
            max_concurrent_uploads: parse_var(
                "TI_MAX_CONCURRENT_UPLOADS",
                defaults.max_concurrent_uploads,
            )?,
            feed_timeout: parse_secs("TI_FEED_TIMEOUT_SECS", defaults.feed_timeout)?,
            siem_timeout: parse_secs("TI_SIEM_TIMEOUT_SECS", defaults.siem_timeout)?,
            purge_settle: parse_secs("TI_PURGE_SETTLE_SECS", defaults.purge_settle)?,
            map_retry: defaults.map_retry,
            sleep_step: defaults.sleep_step,
            overrun,
            accept_invalid_certs: parse_bool("TI_ACCEPT_INVALID_CERTS", false)?,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.feeds.is_empty() {
            return Err(SyncError::InvalidConfig(
                "at least one feed must be configured".to_string(),
            ));
        }
        if self.enabled_maps.is_empty() {
            return Err(SyncError::InvalidConfig(
                "at least one reference map must be enabled".to_string(),
            ));
        }
        if let Some(map) = self
            .enabled_maps
            .iter()
            .find(|map| !self.feeds.iter().any(|(name, _)| name == *map))
        {
            return Err(SyncError::InvalidConfig(format!(
                "enabled map '{map}' has no feed"
            )));
        }

        for (name, value) in [
            ("TI_FEED_API_KEY", &self.feed_api_key),
            ("TI_SIEM_URL", &self.siem_url),
            ("TI_SIEM_TOKEN", &self.siem_token),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::InvalidConfig(format!("{name} cannot be empty")));
            }
        }

        if self.interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "TI_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::InvalidConfig(
                "TI_CHUNK_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(SyncError::InvalidConfig(
                "TI_MAX_CONCURRENT_UPLOADS must be greater than 0".to_string(),
            ));
        }
        if self.map_retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "map retry needs at least one attempt".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Feed URL per map, as consumed by the sync cycle.
    pub fn feed_urls(&self) -> HashMap<MapName, String> {
        self.feeds.iter().cloned().collect()
    }

    pub fn feed_http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            timeout: self.feed_timeout,
            proxy_url: self.https_proxy.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn siem_http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            timeout: self.siem_timeout,
            proxy_url: self.https_proxy.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            strategy: self.strategy,
            map_retry: self.map_retry,
            purge_settle: self.purge_settle,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: self.interval,
            sleep_step: self.sleep_step,
            overrun: self.overrun,
        }
    }
}

/// Parses `map=url` pairs separated by commas.
pub fn parse_feeds(list: &str) -> Result<Vec<(MapName, String)>, SyncError> {
    let mut feeds: Vec<(MapName, String)> = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((map, url)) = entry.split_once('=') else {
            return Err(SyncError::InvalidConfig(format!(
                "feed entry '{entry}' is not of the form map=url"
            )));
        };
        let map = MapName::new(map)?;
        let url = url.trim();
        if url.is_empty() {
            return Err(SyncError::InvalidConfig(format!("feed for '{map}' has no url")));
        }
        if feeds.iter().any(|(name, _)| *name == map) {
            return Err(SyncError::InvalidConfig(format!(
                "reference map '{map}' is declared twice"
            )));
        }
        feeds.push((map, url.to_string()));
    }
    Ok(feeds)
}

fn parse_map_list(list: &str) -> Result<Vec<MapName>, SyncError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(MapName::new)
        .collect()
}

fn required(name: &str) -> Result<String, SyncError> {
    env::var(name).map_err(|_| SyncError::InvalidConfig(format!("{name} must be set")))
}

pub(crate) fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, SyncError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| SyncError::InvalidConfig(format!("{name} has invalid value '{val}'"))),
        Err(_) => Ok(default),
    }
}

fn parse_secs(name: &str, default: Duration) -> Result<Duration, SyncError> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

fn parse_bool(name: &str, default: bool) -> Result<bool, SyncError> {
    match env::var(name) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(SyncError::InvalidConfig(format!(
                "{name} must be true or false, got '{val}'"
            ))),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 19] = [
        "TI_FEEDS",
        "TI_FEED_URL",
        "TI_MAP_NAME",
        "TI_FEED_API_KEY",
        "TI_SIEM_URL",
        "TI_SIEM_TOKEN",
        "TI_ENABLED_MAPS",
        "TI_INTERVAL_SECS",
        "TI_CHUNK_SIZE",
        "TI_LOAD_BULK",
        "TI_MAX_CONCURRENT_UPLOADS",
        "TI_FEED_TIMEOUT_SECS",
        "TI_SIEM_TIMEOUT_SECS",
        "TI_PURGE_SETTLE_SECS",
        "TI_OVERRUN_POLICY",
        "TI_ACCEPT_INVALID_CERTS",
        "TI_PROXY_HTTPS",
        "HTTPS_PROXY",
        "TI_LOG_LEVEL",
    ];

    fn reset_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn set_required() {
        env::set_var("TI_FEEDS", "fs_ti=https://feed.example/ti, botnet=https://feed.example/bot");
        env::set_var("TI_FEED_API_KEY", "feed-key");
        env::set_var("TI_SIEM_URL", "https://siem.example/api/reference_data/maps");
        env::set_var("TI_SIEM_TOKEN", "sec-token");
    }

    fn valid_config() -> SyncConfig {
        SyncConfig {
            feeds: parse_feeds("fs_ti=https://feed.example/ti").unwrap(),
            enabled_maps: vec![MapName::new("fs_ti").unwrap()],
            feed_api_key: "feed-key".to_string(),
            siem_url: "https://siem.example".to_string(),
            siem_token: "sec-token".to_string(),
            ..Default::default()
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        reset_env();
        set_required();

        let config = SyncConfig::from_env().unwrap();

        let names: Vec<&str> = config.enabled_maps.iter().map(MapName::as_str).collect();
        assert_eq!(names, vec!["fs_ti", "botnet"]);
        assert_eq!(config.feeds[1].1, "https://feed.example/bot");
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.strategy, UploadStrategy::Bulk);
        assert_eq!(config.max_concurrent_uploads, 16);
        assert_eq!(config.purge_settle, Duration::from_secs(10));
        assert_eq!(config.overrun, OverrunPolicy::Absorb);
        assert_eq!(config.map_retry, RetryPolicy::fixed(5, Duration::from_secs(5)));
        assert!(!config.accept_invalid_certs);
        assert!(config.https_proxy.is_none());
        assert_eq!(config.log_level, "info");
        reset_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        reset_env();
        set_required();
        env::set_var("TI_ENABLED_MAPS", "botnet");
        env::set_var("TI_INTERVAL_SECS", "600");
        env::set_var("TI_CHUNK_SIZE", "250");
        env::set_var("TI_LOAD_BULK", "False");
        env::set_var("TI_OVERRUN_POLICY", "compound");
        env::set_var("TI_ACCEPT_INVALID_CERTS", "true");
        env::set_var("HTTPS_PROXY", "http://proxy:3128");
        env::set_var("TI_LOG_LEVEL", "DEBUG");

        let config = SyncConfig::from_env().unwrap();

        assert_eq!(config.enabled_maps, vec![MapName::new("botnet").unwrap()]);
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.strategy, UploadStrategy::Single);
        assert_eq!(config.overrun, OverrunPolicy::Compound);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.log_level, "debug");

        let siem = config.siem_http_options();
        assert_eq!(siem.timeout, Duration::from_secs(60));
        assert!(siem.accept_invalid_certs);
        assert_eq!(config.feed_http_options().timeout, Duration::from_secs(30));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_single_feed_shorthand() {
        reset_env();
        env::set_var("TI_FEED_URL", "https://feed.example/ti");
        env::set_var("TI_FEED_API_KEY", "feed-key");
        env::set_var("TI_SIEM_URL", "https://siem.example");
        env::set_var("TI_SIEM_TOKEN", "sec-token");

        let config = SyncConfig::from_env().unwrap();

        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].0.as_str(), "fs_ti");
        assert_eq!(
            config.feed_urls().get(&MapName::new("fs_ti").unwrap()),
            Some(&"https://feed.example/ti".to_string())
        );
        reset_env();
    }

    #[test]
    #[serial]
    fn test_missing_token_is_rejected() {
        reset_env();
        set_required();
        env::remove_var("TI_SIEM_TOKEN");

        let err = SyncConfig::from_env().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: TI_SIEM_TOKEN must be set"
        );
        reset_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        reset_env();
        set_required();
        env::set_var("TI_CHUNK_SIZE", "lots");

        assert!(SyncConfig::from_env().is_err());
        reset_env();
    }

    #[test]
    fn test_default_like_config_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_values() {
        let config = SyncConfig {
            chunk_size: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            interval: Duration::ZERO,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            max_concurrent_uploads: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_enabled_map_without_feed() {
        let config = SyncConfig {
            enabled_maps: vec![MapName::new("tor").unwrap()],
            ..valid_config()
        };
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "invalid configuration: enabled map 'tor' has no feed"
        );
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = SyncConfig {
            log_level: "verbose".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_feeds() {
        let feeds = parse_feeds(" fs_ti = https://a/ti ,botnet=https://b/bot,").unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].0.as_str(), "fs_ti");
        assert_eq!(feeds[0].1, "https://a/ti");
        assert_eq!(feeds[1].1, "https://b/bot");
    }

    #[test]
    fn test_parse_feeds_rejects_bad_entries() {
        assert!(parse_feeds("fs_ti").is_err());
        assert!(parse_feeds("fs_ti=").is_err());
        assert!(parse_feeds("=https://a").is_err());
        assert!(parse_feeds("fs_ti=https://a,fs_ti=https://b").is_err());
    }
}
