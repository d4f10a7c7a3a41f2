//! Plain-text rendering of snapshots and list pages for the terminal.

use protocol::Page;

use crate::execution::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, ListRefresh, SnapshotOrigin,
};
use crate::plan::PlanReport;

pub fn snapshot_line(snapshot: &ExecutionSnapshot) -> String {
    let mut line = format!("[{}] {}", snapshot.id, snapshot.status);
    if let Some(tool) = snapshot.tool_name.as_deref() {
        line.push_str(&format!(" tool={tool}"));
    }
    if let Some(target) = snapshot.target.as_deref() {
        line.push_str(&format!(" target={target}"));
    }
    if let Some(exit_code) = snapshot.exit_code {
        line.push_str(&format!(" exit={exit_code}"));
    }
    if let Some(code) = snapshot.error_code.as_deref() {
        line.push_str(&format!(" error={code}"));
        if let Some(reason) = snapshot.error_reason.as_deref() {
            line.push_str(&format!(" ({reason})"));
        }
    }
    match snapshot.origin {
        SnapshotOrigin::Observed => {}
        SnapshotOrigin::Submitted => line.push_str(" [submitted]"),
        SnapshotOrigin::Synthesized => line.push_str(" [local]"),
    }
    line
}

/// Captured output of a finished execution, if it produced any.
pub fn output_block(snapshot: &ExecutionSnapshot) -> Option<String> {
    let mut block = String::new();
    if !snapshot.stdout.is_empty() {
        block.push_str("--- stdout ---\n");
        push_line(&mut block, &snapshot.stdout);
    }
    if !snapshot.stderr.is_empty() {
        block.push_str("--- stderr ---\n");
        push_line(&mut block, &snapshot.stderr);
    }
    (!block.is_empty()).then_some(block)
}

fn push_line(block: &mut String, text: &str) {
    block.push_str(text);
    if !text.ends_with('\n') {
        block.push('\n');
    }
}

pub fn page_lines(page: &Page<ExecutionSummary>) -> Vec<String> {
    let mut lines = vec![format!(
        "page {} ({} of {} executions)",
        page.page + 1,
        page.items.len(),
        page.total
    )];
    lines.extend(page.items.iter().map(summary_line));
    lines
}

fn summary_line(item: &ExecutionSummary) -> String {
    let exit = item
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<24} {:<9} {:<24} {:<16} {:>4} {}",
        item.id,
        item.status.as_str(),
        item.tool_name.as_deref().unwrap_or("-"),
        item.target.as_deref().unwrap_or("-"),
        exit,
        item.created_at.as_deref().unwrap_or("-"),
    )
}

pub fn refresh_lines(update: &ListRefresh) -> Vec<String> {
    match update {
        ListRefresh::Loaded(page) => page_lines(page),
        ListRefresh::Failed { code, reason } => {
            vec![format!("refresh failed: {code} ({reason}); keeping previous page")]
        }
    }
}

pub fn plan_lines(report: &PlanReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .steps
        .iter()
        .map(|step| {
            format!(
                "step {} {} -> {} ({})",
                step.step + 1,
                step.tool,
                step.status
                    .map(ExecutionStatus::as_str)
                    .unwrap_or("INCOMPLETE"),
                step.execution_id.as_deref().unwrap_or("-"),
            )
        })
        .collect();
    if report.skipped > 0 {
        lines.push(format!("{} step(s) skipped", report.skipped));
    }
    if report.cancelled {
        lines.push("plan cancelled".to_string());
    }
    lines
}

/// Process exit code for the last status seen.
pub fn exit_code(status: Option<ExecutionStatus>) -> u8 {
    match status {
        Some(ExecutionStatus::Success) => 0,
        _ => 1,
    }
}
