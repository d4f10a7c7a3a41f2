use std::time::SystemTime;

use protocol::{RawExecutionListItem, RawExecutionStatus};

use super::model::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, SnapshotOrigin, UNKNOWN_EXIT_CODE,
};

pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
pub const REQUEST_REJECTED: &str = "REQUEST_REJECTED";
pub const CREATE_FAILED: &str = "CREATE_FAILED";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("execution payload has no id")]
    MissingId,
    #[error("execution {id} reported unknown status {status:?}")]
    UnknownStatus { id: String, status: String },
}

/// Maps a server status payload onto the canonical snapshot. Only renames and
/// defaults fields; an absent exit code stays absent.
pub fn normalize(raw: RawExecutionStatus) -> Result<ExecutionSnapshot, MappingError> {
    let status = parse_status(&raw.id, &raw.status)?;
    Ok(ExecutionSnapshot {
        id: raw.id,
        status,
        tool_name: raw.tool_name,
        target: raw.target,
        exit_code: raw.exit_code,
        stdout: raw.stdout.unwrap_or_default(),
        stderr: raw.stderr.unwrap_or_default(),
        created_at: raw.created_at,
        started_at: raw.started_at,
        finished_at: raw.finished_at,
        error_code: raw.error_code,
        error_reason: raw.error_reason,
        failure_stage: raw.failure_stage,
        origin: SnapshotOrigin::Observed,
    })
}

pub fn normalize_summary(raw: RawExecutionListItem) -> Result<ExecutionSummary, MappingError> {
    let status = parse_status(&raw.id, &raw.status)?;
    Ok(ExecutionSummary {
        id: raw.id,
        status,
        tool_name: raw.tool_name,
        target: raw.target,
        exit_code: raw.exit_code,
        created_at: raw.created_at,
        finished_at: raw.finished_at,
    })
}

fn parse_status(id: &str, status: &str) -> Result<ExecutionStatus, MappingError> {
    if id.trim().is_empty() {
        return Err(MappingError::MissingId);
    }
    status
        .parse()
        .map_err(|_| MappingError::UnknownStatus {
            id: id.to_string(),
            status: status.to_string(),
        })
}

/// Terminal `ERROR` snapshot standing in for a failure the server never
/// reported (exhausted retries, unreadable payload, failed submission).
pub fn synthesize_error(
    id: impl Into<String>,
    error_code: &str,
    reason: impl Into<String>,
) -> ExecutionSnapshot {
    ExecutionSnapshot {
        id: id.into(),
        status: ExecutionStatus::Error,
        tool_name: None,
        target: None,
        exit_code: Some(UNKNOWN_EXIT_CODE),
        stdout: String::new(),
        stderr: String::new(),
        created_at: None,
        started_at: None,
        finished_at: Some(now_rfc3339()),
        error_code: Some(error_code.to_string()),
        error_reason: Some(reason.into()),
        failure_stage: None,
        origin: SnapshotOrigin::Synthesized,
    }
}

/// `PENDING` snapshot emitted as soon as a creation call hands back an id.
pub fn submitted(
    id: impl Into<String>,
    tool_name: &str,
    target: Option<&str>,
) -> ExecutionSnapshot {
    ExecutionSnapshot {
        id: id.into(),
        status: ExecutionStatus::Pending,
        tool_name: Some(tool_name.to_string()),
        target: target.map(str::to_string),
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        created_at: Some(now_rfc3339()),
        started_at: None,
        finished_at: None,
        error_code: None,
        error_reason: None,
        failure_stage: None,
        origin: SnapshotOrigin::Submitted,
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, status: &str) -> RawExecutionStatus {
        RawExecutionStatus {
            id: id.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_missing_exit_code_absent() {
        let snapshot = normalize(raw("e1", "RUNNING")).expect("normalize");
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert_eq!(snapshot.exit_code, None);
        assert_eq!(snapshot.stdout, "");
        assert_eq!(snapshot.origin, SnapshotOrigin::Observed);
    }

    #[test]
    fn carries_failure_diagnostics() {
        let mut payload = raw("e2", "FAILED");
        payload.exit_code = Some(2);
        payload.stderr = Some("permission denied".to_string());
        payload.error_code = Some("EXIT_NON_ZERO".to_string());
        payload.failure_stage = Some("execute".to_string());
        payload.finished_at = Some("2024-05-01T10:00:00Z".to_string());

        let snapshot = normalize(payload).expect("normalize");
        assert_eq!(snapshot.status, ExecutionStatus::Failed);
        assert_eq!(snapshot.exit_code, Some(2));
        assert_eq!(snapshot.stderr, "permission denied");
        assert_eq!(snapshot.error_code.as_deref(), Some("EXIT_NON_ZERO"));
        assert_eq!(snapshot.failure_stage.as_deref(), Some("execute"));
        assert!(snapshot.is_terminal());
    }

    #[test]
    fn normalize_is_deterministic() {
        let mut payload = raw("e3", "SUCCESS");
        payload.exit_code = Some(0);
        payload.stdout = Some("up 3 days".to_string());
        assert_eq!(normalize(payload.clone()), normalize(payload));
    }

    #[test]
    fn unknown_status_fails_fast() {
        let err = normalize(raw("e4", "QUEUED")).unwrap_err();
        assert_eq!(
            err,
            MappingError::UnknownStatus {
                id: "e4".to_string(),
                status: "QUEUED".to_string(),
            }
        );
    }

    #[test]
    fn lowercase_and_alternate_spellings_are_not_coerced() {
        for status in ["canceled", "Canceled", " success ", "running"] {
            assert_eq!(
                normalize(raw("e7", status)),
                Err(MappingError::UnknownStatus {
                    id: "e7".to_string(),
                    status: status.to_string(),
                })
            );
        }
    }

    #[test]
    fn empty_id_is_malformed() {
        assert_eq!(normalize(raw(" ", "RUNNING")), Err(MappingError::MissingId));
    }

    #[test]
    fn synthesized_error_is_terminal_with_unknown_exit_code() {
        let snapshot = synthesize_error("e5", TRANSPORT_ERROR, "connection refused");
        assert_eq!(snapshot.status, ExecutionStatus::Error);
        assert_eq!(snapshot.exit_code, Some(UNKNOWN_EXIT_CODE));
        assert_eq!(snapshot.error_reason.as_deref(), Some("connection refused"));
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.is_synthesized());
        assert!(snapshot.is_terminal());
    }

    #[test]
    fn summary_maps_list_rows() {
        let item = RawExecutionListItem {
            id: "e6".to_string(),
            status: "pending".to_string(),
            tool_name: Some("disk.usage".to_string()),
            ..Default::default()
        };
        let summary = normalize_summary(item).expect("summary");
        assert_eq!(summary.status, ExecutionStatus::Pending);
        assert_eq!(summary.tool_name.as_deref(), Some("disk.usage"));
    }
}
