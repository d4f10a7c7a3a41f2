use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{ListQuery, SharedClient};

use super::mapper::{submitted, synthesize_error, CREATE_FAILED};
use super::model::ExecutionSnapshot;
use super::poller::{poll_loop, spawn_poll, Labels, PollConfig};
use super::refresh::{send_interval, spawn_refresh, validate_interval, AutoRefresh};
use super::subscription::{spawn_loop, Emitter, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("interval must be positive")]
    InvalidInterval,
    #[error("subscription is no longer active")]
    Inactive,
    #[error("no auto-refresh running for {0}")]
    NotRefreshing(String),
}

/// One tool invocation to submit.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub target: Option<String>,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: Value::Object(Default::default()),
            target: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Submits `request` once, then polls the returned execution to a terminal
/// status. The first item is the submitted `PENDING` snapshot; a failed
/// submission yields a single `CREATE_FAILED` error snapshot instead.
pub fn create_then_poll(
    client: SharedClient,
    request: ExecutionRequest,
    config: PollConfig,
) -> Result<Subscription<ExecutionSnapshot>, CoordinatorError> {
    config.validate()?;
    Ok(spawn_create_then_poll(client, request, config, None).0)
}

fn spawn_create_then_poll(
    client: SharedClient,
    request: ExecutionRequest,
    config: PollConfig,
    parent: Option<&CancellationToken>,
) -> (Subscription<ExecutionSnapshot>, JoinHandle<()>) {
    spawn_loop(parent, move |emitter| async move {
        create_and_poll(&emitter, &client, &request, &config).await;
    })
}

async fn create_and_poll(
    emitter: &Emitter<ExecutionSnapshot>,
    client: &SharedClient,
    request: &ExecutionRequest,
    config: &PollConfig,
) {
    info!(
        event = "create.start",
        tool = %request.tool_name,
        target = request.target.as_deref().unwrap_or("-"),
        "submitting execution"
    );
    let created = tokio::select! {
        _ = emitter.cancel_token().cancelled() => {
            info!(event = "create.cancelled", tool = %request.tool_name, "submission cancelled");
            return;
        }
        created = client.create_execution(
            &request.tool_name,
            &request.arguments,
            request.target.as_deref(),
        ) => created,
    };
    let reason = match created {
        Ok(created) if !created.execution_id.trim().is_empty() => {
            info!(
                event = "create.accepted",
                tool = %request.tool_name,
                execution_id = %created.execution_id,
                "execution accepted"
            );
            let pending = submitted(
                &created.execution_id,
                &request.tool_name,
                request.target.as_deref(),
            );
            let labels = Labels::from_snapshot(&pending);
            if emitter.emit(pending).await {
                poll_loop(emitter, client, &created.execution_id, config, labels).await;
            }
            return;
        }
        Ok(_) => "server returned an empty execution id".to_string(),
        Err(err) => err.to_string(),
    };
    warn!(
        event = "create.failed",
        tool = %request.tool_name,
        error = %reason,
        "execution submission failed"
    );
    let mut snapshot = synthesize_error(format!("local-{}", Uuid::new_v4()), CREATE_FAILED, reason);
    snapshot.tool_name = Some(request.tool_name.clone());
    snapshot.target = request.target.clone();
    emitter.emit(snapshot).await;
}

struct ActiveLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    interval_tx: Option<Arc<watch::Sender<Duration>>>,
}

/// Keeps at most one running loop per subscriber key. Starting a loop under
/// a key cancels the previous one and waits for it to finish first.
pub struct LifecycleCoordinator {
    client: SharedClient,
    poll_config: PollConfig,
    shutdown: CancellationToken,
    active: Mutex<HashMap<String, ActiveLoop>>,
}

impl LifecycleCoordinator {
    pub fn new(client: SharedClient, poll_config: PollConfig) -> Result<Self, CoordinatorError> {
        poll_config.validate()?;
        Ok(Self {
            client,
            poll_config,
            shutdown: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll_config
    }

    /// Submits `request` and tracks it under `key`.
    pub async fn track(
        &self,
        key: &str,
        request: ExecutionRequest,
    ) -> Subscription<ExecutionSnapshot> {
        let mut active = self.active.lock().await;
        stop_entry(&mut active, key).await;
        let (subscription, task) = spawn_create_then_poll(
            Arc::clone(&self.client),
            request,
            self.poll_config.clone(),
            Some(&self.shutdown),
        );
        active.insert(key.to_string(), loop_entry(&subscription, task));
        subscription
    }

    /// Polls an execution that already exists.
    pub async fn watch(&self, key: &str, id: &str) -> Subscription<ExecutionSnapshot> {
        let mut active = self.active.lock().await;
        stop_entry(&mut active, key).await;
        let (subscription, task) = spawn_poll(
            Arc::clone(&self.client),
            id.to_string(),
            self.poll_config.clone(),
            Some(&self.shutdown),
        );
        active.insert(key.to_string(), loop_entry(&subscription, task));
        subscription
    }

    /// Starts a list auto-refresh under `key`. An invalid interval leaves any
    /// loop already running under `key` untouched.
    pub async fn auto_refresh(
        &self,
        key: &str,
        query: ListQuery,
        interval: Duration,
    ) -> Result<AutoRefresh, CoordinatorError> {
        validate_interval(interval)?;
        let mut active = self.active.lock().await;
        stop_entry(&mut active, key).await;
        let (refresh, task) = spawn_refresh(
            Arc::clone(&self.client),
            query,
            interval,
            Some(&self.shutdown),
        )?;
        let entry = ActiveLoop {
            cancel: refresh.cancel_token(),
            task,
            interval_tx: Some(refresh.interval_sender()),
        };
        active.insert(key.to_string(), entry);
        Ok(refresh)
    }

    pub async fn set_refresh_interval(
        &self,
        key: &str,
        interval: Duration,
    ) -> Result<(), CoordinatorError> {
        let active = self.active.lock().await;
        let tx = active
            .get(key)
            .and_then(|entry| entry.interval_tx.as_ref())
            .ok_or_else(|| CoordinatorError::NotRefreshing(key.to_string()))?;
        send_interval(tx, interval)
    }

    /// Cancels the loop under `key`. Returns whether one was registered.
    pub async fn stop(&self, key: &str) -> bool {
        let mut active = self.active.lock().await;
        stop_entry(&mut active, key).await
    }

    pub async fn stop_all(&self) {
        let mut active = self.active.lock().await;
        let keys: Vec<String> = active.keys().cloned().collect();
        for key in keys {
            stop_entry(&mut active, &key).await;
        }
    }

    pub async fn is_active(&self, key: &str) -> bool {
        let mut active = self.active.lock().await;
        let running = active
            .get(key)
            .map(|entry| !entry.cancel.is_cancelled() && !entry.task.is_finished());
        if running == Some(false) {
            active.remove(key);
        }
        running.unwrap_or(false)
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn loop_entry<T>(subscription: &Subscription<T>, task: JoinHandle<()>) -> ActiveLoop {
    ActiveLoop {
        cancel: subscription.cancel_token(),
        task,
        interval_tx: None,
    }
}

async fn stop_entry(active: &mut HashMap<String, ActiveLoop>, key: &str) -> bool {
    let Some(entry) = active.remove(key) else {
        return false;
    };
    entry.cancel.cancel();
    if let Err(err) = entry.task.await {
        warn!(event = "coordinator.join_failed", key, error = %err, "loop task failed");
    }
    info!(event = "coordinator.stopped", key, "subscriber loop stopped");
    true
}
