//! Text summary builder for CLI output.
//!
//! Formats the final human-readable lines for `run`, `stop` and `status`. Per-step progress
//! is printed from events as it happens; these lines close out a command.

use crate::model::{LaunchSummary, StatusReport, StopReport};
use std::path::Path;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_launch_summary(summary: &LaunchSummary, pid_file: &Path) -> TextSummary {
    TextSummary {
        lines: vec![format!(
            "Running: model server pid {}, bot server pid {} (recorded in {})",
            summary.model_pid,
            summary.bot_pid,
            pid_file.display()
        )],
    }
}

pub(crate) fn build_stop_summary(report: &StopReport) -> TextSummary {
    let mut lines = Vec::new();
    if !report.state_file_found {
        lines.push("Nothing to stop".to_string());
        return TextSummary { lines };
    }
    let survivors = report.entries.iter().filter(|e| e.survived()).count();
    if survivors > 0 {
        lines.push(format!(
            "{} process(es) still running and kept in the state file",
            survivors
        ));
    } else {
        lines.push("All processes stopped".to_string());
    }
    TextSummary { lines }
}

pub(crate) fn build_status_summary(report: &StatusReport) -> TextSummary {
    let mut lines = Vec::new();
    if report.entries.is_empty() {
        lines.push(format!("No processes recorded in {}", report.pid_file.display()));
        return TextSummary { lines };
    }
    for e in &report.entries {
        let role = e.role.map(|r| r.label()).unwrap_or("unknown");
        let state = if e.alive { "running" } else { "not running" };
        lines.push(format!("{:<13} pid {:<8} {}", role, e.pid, state));
    }
    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessRole, SignalOutcome, StatusEntry, StopEntry};
    use std::path::PathBuf;

    #[test]
    fn status_lines_are_aligned_per_process() {
        let report = StatusReport {
            pid_file: PathBuf::from("pids.txt"),
            entries: vec![
                StatusEntry {
                    pid: 101,
                    role: Some(ProcessRole::Model),
                    alive: true,
                },
                StatusEntry {
                    pid: 202,
                    role: Some(ProcessRole::Bot),
                    alive: false,
                },
            ],
        };
        let s = build_status_summary(&report);
        assert_eq!(
            s.lines,
            vec![
                "model server  pid 101      running".to_string(),
                "bot server    pid 202      not running".to_string(),
            ]
        );
    }

    #[test]
    fn stop_summary_counts_survivors() {
        let report = StopReport {
            state_file_found: true,
            entries: vec![StopEntry {
                pid: 9,
                role: None,
                outcome: SignalOutcome::Terminated,
                still_running: true,
            }],
        };
        assert_eq!(
            build_stop_summary(&report).lines,
            vec!["1 process(es) still running and kept in the state file".to_string()]
        );
        assert_eq!(
            build_stop_summary(&StopReport::default()).lines,
            vec!["Nothing to stop".to_string()]
        );
    }
}
