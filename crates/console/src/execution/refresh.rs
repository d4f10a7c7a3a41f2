use std::sync::Arc;
use std::time::Duration;

use protocol::Page;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ListQuery, SharedClient};

use super::coordinator::CoordinatorError;
use super::mapper::{normalize_summary, PROTOCOL_ERROR};
use super::model::ExecutionSummary;
use super::subscription::{spawn_loop, Emitter, Subscription};

/// One auto-refresh tick. A failed tick leaves the last loaded page current.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListRefresh {
    Loaded(Page<ExecutionSummary>),
    Failed { code: &'static str, reason: String },
}

/// Handle to a running list auto-refresh. Unlike a poll it never finishes on
/// its own; drop it or call [`AutoRefresh::cancel`] to stop.
pub struct AutoRefresh {
    subscription: Subscription<ListRefresh>,
    interval_tx: Arc<watch::Sender<Duration>>,
}

impl AutoRefresh {
    pub async fn next(&mut self) -> Option<ListRefresh> {
        self.subscription.next().await
    }

    /// Restarts the timer with `interval`, refreshing immediately.
    pub fn set_interval(&self, interval: Duration) -> Result<(), CoordinatorError> {
        send_interval(&self.interval_tx, interval)
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    pub fn cancel(&self) {
        self.subscription.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.subscription.cancel_token()
    }

    pub(crate) fn interval_sender(&self) -> Arc<watch::Sender<Duration>> {
        Arc::clone(&self.interval_tx)
    }
}

pub(crate) fn send_interval(
    tx: &watch::Sender<Duration>,
    interval: Duration,
) -> Result<(), CoordinatorError> {
    validate_interval(interval)?;
    tx.send(interval).map_err(|_| CoordinatorError::Inactive)
}

pub(crate) fn validate_interval(interval: Duration) -> Result<(), CoordinatorError> {
    if interval.is_zero() {
        return Err(CoordinatorError::InvalidInterval);
    }
    Ok(())
}

/// Re-fetches the list page for `query` every `interval`, starting now.
pub fn auto_refresh(
    client: SharedClient,
    query: ListQuery,
    interval: Duration,
) -> Result<AutoRefresh, CoordinatorError> {
    Ok(spawn_refresh(client, query, interval, None)?.0)
}

pub(crate) fn spawn_refresh(
    client: SharedClient,
    query: ListQuery,
    interval: Duration,
    parent: Option<&CancellationToken>,
) -> Result<(AutoRefresh, JoinHandle<()>), CoordinatorError> {
    validate_interval(interval)?;
    let (interval_tx, interval_rx) = watch::channel(interval);
    let (subscription, task) = spawn_loop(parent, move |emitter| async move {
        refresh_loop(emitter, client, query, interval_rx).await;
    });
    let handle = AutoRefresh {
        subscription,
        interval_tx: Arc::new(interval_tx),
    };
    Ok((handle, task))
}

async fn refresh_loop(
    emitter: Emitter<ListRefresh>,
    client: SharedClient,
    query: ListQuery,
    mut interval_rx: watch::Receiver<Duration>,
) {
    let mut interval = *interval_rx.borrow_and_update();
    info!(
        event = "refresh.start",
        page = query.page,
        size = query.size,
        interval_ms = interval.as_millis(),
        "list auto-refresh started"
    );
    loop {
        let result = tokio::select! {
            _ = emitter.cancel_token().cancelled() => break,
            result = client.fetch_executions_page(&query) => result,
        };
        let update = match result {
            Ok(page) => match page.try_map(normalize_summary) {
                Ok(page) => {
                    debug!(
                        event = "refresh.loaded",
                        items = page.items.len(),
                        total = page.total,
                        "list page loaded"
                    );
                    ListRefresh::Loaded(page)
                }
                Err(err) => {
                    warn!(event = "refresh.protocol_error", error = %err, "unreadable list page");
                    ListRefresh::Failed {
                        code: PROTOCOL_ERROR,
                        reason: err.to_string(),
                    }
                }
            },
            Err(err) => {
                warn!(event = "refresh.failed", error = %err, "list refresh failed");
                ListRefresh::Failed {
                    code: err.error_code(),
                    reason: err.to_string(),
                }
            }
        };
        if !emitter.emit(update).await {
            break;
        }
        tokio::select! {
            _ = emitter.cancel_token().cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                interval = *interval_rx.borrow_and_update();
                info!(
                    event = "refresh.interval_changed",
                    interval_ms = interval.as_millis(),
                    "restarting list auto-refresh timer"
                );
            }
        }
    }
    info!(event = "refresh.stopped", "list auto-refresh stopped");
}
