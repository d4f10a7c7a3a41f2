mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::{CreatedExecution, Page, RawExecutionListItem, RawExecutionStatus};
use serde_json::Value;

use crate::execution::mapper::{PROTOCOL_ERROR, REQUEST_REJECTED, TRANSPORT_ERROR};

pub use http::HttpExecutionClient;

pub type SharedClient = Arc<dyn ExecutionClient>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unreadable response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => retryable_status(*status),
            Self::Decode(_) => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => PROTOCOL_ERROR,
            Self::Status { status, .. } if !retryable_status(*status) => REQUEST_REJECTED,
            _ => TRANSPORT_ERROR,
        }
    }
}

/// 5xx, 408 Request Timeout and 429 Too Many Requests are worth another try.
fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Filters and paging for the execution list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filters: BTreeMap<String, String>,
    pub page: u32,
    pub size: u32,
    pub sort: Option<String>,
}

impl ListQuery {
    pub(crate) fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("size".to_string(), self.size.to_string()),
        ];
        if let Some(sort) = self.sort.as_ref().filter(|sort| !sort.trim().is_empty()) {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        for (key, value) in &self.filters {
            if !value.trim().is_empty() {
                pairs.push((key.clone(), value.clone()));
            }
        }
        pairs
    }
}

/// The backend operations the lifecycle engine depends on. Each call is a
/// single request; retry policy belongs to the caller.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn create_execution(
        &self,
        tool_name: &str,
        arguments: &Value,
        target: Option<&str>,
    ) -> Result<CreatedExecution, TransportError>;

    async fn fetch_execution(&self, id: &str) -> Result<RawExecutionStatus, TransportError>;

    async fn fetch_executions_page(
        &self,
        query: &ListQuery,
    ) -> Result<Page<RawExecutionListItem>, TransportError>;
}
