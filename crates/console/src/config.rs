use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use protocol::config::{
    ConsoleConfig, ListConfig, PollingConfig, DEFAULT_PAGE_SIZE, DEFAULT_POLLING_INTERVAL_MS,
    DEFAULT_REFRESH_INTERVAL, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY_MS,
};

use crate::execution::PollConfig;

/// Validated runtime settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub polling: PollConfig,
    pub list: ListSettings,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListSettings {
    pub refresh_interval: Duration,
    pub page_size: u32,
    pub sort: Option<String>,
}

impl Settings {
    /// Settings with every optional key at its default.
    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        resolve(ConsoleConfig {
            base_url: base_url.into(),
            request_timeout_ms: None,
            polling: PollingConfig::default(),
            list: ListConfig::default(),
        })
    }
}

pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_settings(&raw).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    let config: ConsoleConfig = toml::from_str(raw).context("failed to parse config")?;
    resolve(config)
}

fn resolve(config: ConsoleConfig) -> anyhow::Result<Settings> {
    let base_url = config.base_url.trim().to_string();
    if base_url.is_empty() {
        bail!("base_url must not be empty");
    }
    let request_timeout_ms = config
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    if request_timeout_ms == 0 {
        bail!("request_timeout_ms must be positive");
    }

    let interval_ms = config
        .polling
        .interval_ms
        .unwrap_or(DEFAULT_POLLING_INTERVAL_MS);
    if interval_ms == 0 {
        bail!("polling.interval_ms must be positive");
    }
    let retry_count = config.polling.retry_count.unwrap_or(DEFAULT_RETRY_COUNT);
    if retry_count == 0 {
        bail!("polling.retry_count must be at least 1");
    }
    let retry_delay_ms = config
        .polling
        .retry_delay_ms
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);

    let refresh_raw = config
        .list
        .refresh_interval
        .as_deref()
        .unwrap_or(DEFAULT_REFRESH_INTERVAL);
    let refresh_interval = humantime::parse_duration(refresh_raw)
        .with_context(|| format!("invalid list.refresh_interval {refresh_raw:?}"))?;
    if refresh_interval.is_zero() {
        bail!("list.refresh_interval must be positive");
    }
    let page_size = config.list.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        bail!("list.page_size must be positive");
    }

    Ok(Settings {
        base_url,
        request_timeout: Duration::from_millis(request_timeout_ms),
        polling: PollConfig {
            interval: Duration::from_millis(interval_ms),
            retry_count,
            retry_delay: Duration::from_millis(retry_delay_ms),
        },
        list: ListSettings {
            refresh_interval,
            page_size,
            sort: config.list.sort.filter(|sort| !sort.trim().is_empty()),
        },
    })
}
