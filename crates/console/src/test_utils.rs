use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use protocol::{CreatedExecution, Page, RawExecutionListItem, RawExecutionStatus};
use serde_json::Value;
use tokio::time::Instant;

use crate::client::{ExecutionClient, ListQuery, TransportError};

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{prefix}-{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn raw_status(id: &str, status: &str) -> RawExecutionStatus {
    RawExecutionStatus {
        id: id.to_string(),
        status: status.to_string(),
        ..Default::default()
    }
}

pub(crate) fn raw_finished(id: &str, status: &str, exit_code: i32, stdout: &str) -> RawExecutionStatus {
    RawExecutionStatus {
        exit_code: Some(exit_code),
        stdout: Some(stdout.to_string()),
        finished_at: Some("2024-05-01T10:00:00Z".to_string()),
        ..raw_status(id, status)
    }
}

pub(crate) fn network_error() -> TransportError {
    TransportError::Network("connection refused".to_string())
}

pub(crate) fn page_of(ids: &[&str], page: u32) -> Page<RawExecutionListItem> {
    Page {
        items: ids
            .iter()
            .map(|id| RawExecutionListItem {
                id: id.to_string(),
                status: "RUNNING".to_string(),
                ..Default::default()
            })
            .collect(),
        total: ids.len() as u64,
        page,
        size: 20,
    }
}

type FetchResult = Result<RawExecutionStatus, TransportError>;
type PageResult = Result<Page<RawExecutionListItem>, TransportError>;

/// In-memory backend that replays scripted responses and records calls.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    creates: Mutex<VecDeque<Result<CreatedExecution, TransportError>>>,
    fetches: Mutex<VecDeque<FetchResult>>,
    fetch_fallback: Mutex<Option<FetchResult>>,
    pages: Mutex<VecDeque<PageResult>>,
    page_fallback: Mutex<Option<PageResult>>,
    fetch_delay: Option<Duration>,
    list_delay: Option<Duration>,
    create_calls: AtomicUsize,
    fetch_ids: Mutex<Vec<String>>,
    fetch_times: Mutex<Vec<Instant>>,
    list_times: Mutex<Vec<Instant>>,
    list_in_flight: AtomicUsize,
    list_max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_create(self, result: Result<&str, TransportError>) -> Self {
        let result = result.map(|id| CreatedExecution {
            execution_id: id.to_string(),
        });
        self.creates.lock().expect("lock").push_back(result);
        self
    }

    pub(crate) fn with_fetches(self, results: Vec<FetchResult>) -> Self {
        self.fetches.lock().expect("lock").extend(results);
        self
    }

    /// Response replayed once the scripted fetches run out.
    pub(crate) fn with_fetch_fallback(self, result: FetchResult) -> Self {
        *self.fetch_fallback.lock().expect("lock") = Some(result);
        self
    }

    pub(crate) fn with_pages(self, results: Vec<PageResult>) -> Self {
        self.pages.lock().expect("lock").extend(results);
        self
    }

    pub(crate) fn with_page_fallback(self, result: PageResult) -> Self {
        *self.page_fallback.lock().expect("lock") = Some(result);
        self
    }

    pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub(crate) fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_ids.lock().expect("lock").len()
    }

    pub(crate) fn fetch_ids(&self) -> Vec<String> {
        self.fetch_ids.lock().expect("lock").clone()
    }

    pub(crate) fn fetch_times(&self) -> Vec<Instant> {
        self.fetch_times.lock().expect("lock").clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_times.lock().expect("lock").len()
    }

    pub(crate) fn list_times(&self) -> Vec<Instant> {
        self.list_times.lock().expect("lock").clone()
    }

    pub(crate) fn list_max_in_flight(&self) -> usize {
        self.list_max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn create_execution(
        &self,
        _tool_name: &str,
        _arguments: &Value,
        _target: Option<&str>,
    ) -> Result<CreatedExecution, TransportError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.creates
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted creation".to_string())))
    }

    async fn fetch_execution(&self, id: &str) -> Result<RawExecutionStatus, TransportError> {
        self.fetch_ids.lock().expect("lock").push(id.to_string());
        self.fetch_times.lock().expect("lock").push(Instant::now());
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.fetches.lock().expect("lock").pop_front();
        next.or_else(|| self.fetch_fallback.lock().expect("lock").clone())
            .unwrap_or_else(|| Err(TransportError::Network("no scripted fetch".to_string())))
    }

    async fn fetch_executions_page(
        &self,
        _query: &ListQuery,
    ) -> Result<Page<RawExecutionListItem>, TransportError> {
        self.list_times.lock().expect("lock").push(Instant::now());
        let in_flight = self.list_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.list_max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        self.list_in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.pages.lock().expect("lock").pop_front();
        next.or_else(|| self.page_fallback.lock().expect("lock").clone())
            .unwrap_or_else(|| Err(TransportError::Network("no scripted page".to_string())))
    }
}
