mod coordinator;
pub mod mapper;
mod model;
mod poller;
mod refresh;
mod subscription;

pub use coordinator::{create_then_poll, CoordinatorError, ExecutionRequest, LifecycleCoordinator};
pub use mapper::{normalize, normalize_summary, synthesize_error, MappingError};
pub use model::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, SnapshotOrigin, UnknownStatus,
    UNKNOWN_EXIT_CODE,
};
pub use poller::{poll, PollConfig};
pub use refresh::{auto_refresh, AutoRefresh, ListRefresh};
pub use subscription::Subscription;
