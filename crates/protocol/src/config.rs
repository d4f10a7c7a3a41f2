use serde::Deserialize;

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1_500;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REFRESH_INTERVAL: &str = "30s";
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub list: ListConfig,
}

#[derive(Debug, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListConfig {
    /// humantime duration such as `30s` or `2m`.
    pub refresh_interval: Option<String>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: None,
            retry_count: None,
            retry_delay_ms: None,
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            refresh_interval: None,
            page_size: None,
            sort: None,
        }
    }
}
