use crate::model::{StatusEntry, StatusReport};
use crate::{pidfile, process};
use anyhow::Result;
use std::path::Path;

/// Liveness of every PID in the state file. An absent file yields an empty report.
pub(crate) fn collect_status(pid_file: &Path) -> Result<StatusReport> {
    let entries = pidfile::read(pid_file)?
        .unwrap_or_default()
        .into_iter()
        .map(|r| StatusEntry {
            pid: r.pid,
            role: r.role,
            alive: process::is_alive(r.pid),
        })
        .collect();
    Ok(StatusReport {
        pid_file: pid_file.to_path_buf(),
        entries,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::ProcessRole;

    #[test]
    fn reports_live_and_dead_pids() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pids.txt");

        let mut gone = std::process::Command::new("true").spawn().unwrap();
        let gone_pid = gone.id();
        gone.wait().unwrap();
        let me = std::process::id();
        std::fs::write(&pid_file, format!("{me}\n{gone_pid}\n")).unwrap();

        let report = collect_status(&pid_file).unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].role, Some(ProcessRole::Model));
        assert!(report.entries[0].alive);
        assert_eq!(report.entries[1].role, Some(ProcessRole::Bot));
        assert!(!report.entries[1].alive);
    }

    #[test]
    fn no_state_file_means_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect_status(&dir.path().join("pids.txt")).unwrap();
        assert!(report.entries.is_empty());
    }
}
