use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Exit code carried by snapshots the console fabricated itself, and by
/// executions whose process outcome is not known.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Error | Self::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "ERROR" => Ok(Self::Error),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(UnknownStatus(raw.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Decoded from a server response.
    Observed,
    /// Emitted locally right after the creation call returned an id.
    Submitted,
    /// Fabricated locally to stand in for a failure the server never reported.
    Synthesized,
}

/// One observed (or derived) state of an execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionSnapshot {
    pub id: String,
    pub status: ExecutionStatus,
    pub tool_name: Option<String>,
    pub target: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub failure_stage: Option<String>,
    pub origin: SnapshotOrigin,
}

impl ExecutionSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_synthesized(&self) -> bool {
        self.origin == SnapshotOrigin::Synthesized
    }
}

/// A row of the execution list view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub id: String,
    pub status: ExecutionStatus,
    pub tool_name: Option<String>,
    pub target: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: Option<String>,
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_set_matches_end_states() {
        let terminal: Vec<_> = [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Error,
            ExecutionStatus::Cancelled,
        ]
        .into_iter()
        .filter(|status| status.is_terminal())
        .collect();
        assert_eq!(
            terminal,
            vec![
                ExecutionStatus::Success,
                ExecutionStatus::Failed,
                ExecutionStatus::Error,
                ExecutionStatus::Cancelled,
            ]
        );
    }

    #[test]
    fn parses_exact_status_names() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Error,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>(), Ok(status));
        }
    }

    #[test]
    fn rejects_near_miss_spellings() {
        for raw in ["running", "Success", " SUCCESS ", "CANCELED", "canceled", ""] {
            assert_eq!(
                raw.parse::<ExecutionStatus>(),
                Err(UnknownStatus(raw.to_string())),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_status() {
        let err = "QUEUED".parse::<ExecutionStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("QUEUED".to_string()));
    }
}
