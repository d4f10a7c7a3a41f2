use std::time::Duration;

use protocol::config::{DEFAULT_POLLING_INTERVAL_MS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS};
use protocol::RawExecutionStatus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{SharedClient, TransportError};

use super::coordinator::CoordinatorError;
use super::mapper::{normalize, synthesize_error, PROTOCOL_ERROR};
use super::model::ExecutionSnapshot;
use super::subscription::{spawn_loop, Emitter, Subscription};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Attempts per tick before the tick counts as failed.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.interval.is_zero() {
            return Err(CoordinatorError::InvalidInterval);
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Polls one execution until it reaches a terminal status. The first fetch
/// happens immediately; every emitted snapshot is delivered before the
/// terminal check, so the last item is always the terminal one.
pub fn poll(
    client: SharedClient,
    id: impl Into<String>,
    config: PollConfig,
) -> Result<Subscription<ExecutionSnapshot>, CoordinatorError> {
    config.validate()?;
    Ok(spawn_poll(client, id.into(), config, None).0)
}

pub(crate) fn spawn_poll(
    client: SharedClient,
    id: String,
    config: PollConfig,
    parent: Option<&CancellationToken>,
) -> (Subscription<ExecutionSnapshot>, JoinHandle<()>) {
    spawn_loop(parent, move |emitter| async move {
        poll_loop(&emitter, &client, &id, &config, Labels::default()).await;
    })
}

/// Tool and target last reported for an execution, copied onto snapshots
/// fabricated after a failed tick.
#[derive(Clone, Debug, Default)]
pub(crate) struct Labels {
    tool_name: Option<String>,
    target: Option<String>,
}

impl Labels {
    pub(crate) fn from_snapshot(snapshot: &ExecutionSnapshot) -> Self {
        Self {
            tool_name: snapshot.tool_name.clone(),
            target: snapshot.target.clone(),
        }
    }

    fn observe(&mut self, snapshot: &ExecutionSnapshot) {
        if snapshot.tool_name.is_some() {
            self.tool_name = snapshot.tool_name.clone();
        }
        if snapshot.target.is_some() {
            self.target = snapshot.target.clone();
        }
    }

    fn fill(&self, snapshot: &mut ExecutionSnapshot) {
        if snapshot.tool_name.is_none() {
            snapshot.tool_name = self.tool_name.clone();
        }
        if snapshot.target.is_none() {
            snapshot.target = self.target.clone();
        }
    }
}

/// Runs the tick loop against an existing emitter. Returns `false` if the
/// loop stopped because the subscription went away.
pub(crate) async fn poll_loop(
    emitter: &Emitter<ExecutionSnapshot>,
    client: &SharedClient,
    id: &str,
    config: &PollConfig,
    mut labels: Labels,
) -> bool {
    info!(
        event = "poll.start",
        execution_id = %id,
        interval_ms = config.interval.as_millis(),
        "polling execution"
    );
    let mut tick: u64 = 0;
    loop {
        let Some(mut snapshot) = run_tick(emitter, client, id, config).await else {
            info!(event = "poll.cancelled", execution_id = %id, tick, "poll cancelled");
            return false;
        };
        if snapshot.is_synthesized() {
            labels.fill(&mut snapshot);
        } else {
            labels.observe(&snapshot);
        }
        let status = snapshot.status;
        debug!(event = "poll.tick", execution_id = %id, tick, status = %status, "poll tick");
        if !emitter.emit(snapshot).await {
            info!(event = "poll.cancelled", execution_id = %id, tick, "poll cancelled");
            return false;
        }
        if status.is_terminal() {
            info!(
                event = "poll.finished",
                execution_id = %id,
                status = %status,
                ticks = tick + 1,
                "execution reached terminal status"
            );
            return true;
        }
        tick += 1;
        if !emitter.wait(config.interval).await {
            info!(event = "poll.cancelled", execution_id = %id, tick, "poll cancelled");
            return false;
        }
    }
}

/// One fetch-and-classify cycle. `None` means the subscription was cancelled
/// mid-tick.
async fn run_tick(
    emitter: &Emitter<ExecutionSnapshot>,
    client: &SharedClient,
    id: &str,
    config: &PollConfig,
) -> Option<ExecutionSnapshot> {
    let snapshot = match fetch_with_retry(emitter, client, id, config).await? {
        Ok(raw) => match normalize(raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    event = "poll.protocol_error",
                    execution_id = %id,
                    error = %err,
                    "unreadable execution status"
                );
                synthesize_error(id, PROTOCOL_ERROR, err.to_string())
            }
        },
        Err(err) => {
            warn!(
                event = "poll.tick_failed",
                execution_id = %id,
                error = %err,
                code = err.error_code(),
                "poll tick failed"
            );
            synthesize_error(id, err.error_code(), err.to_string())
        }
    };
    Some(snapshot)
}

async fn fetch_with_retry(
    emitter: &Emitter<ExecutionSnapshot>,
    client: &SharedClient,
    id: &str,
    config: &PollConfig,
) -> Option<Result<RawExecutionStatus, TransportError>> {
    let attempts = config.retry_count.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = emitter.cancel_token().cancelled() => return None,
            result = client.fetch_execution(id) => result,
        };
        match result {
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    event = "poll.retry",
                    execution_id = %id,
                    attempt,
                    attempts,
                    error = %err,
                    "retrying status fetch"
                );
                if !emitter.wait(config.retry_delay).await {
                    return None;
                }
                attempt += 1;
            }
            result => return Some(result),
        }
    }
}
