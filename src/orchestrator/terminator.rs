//! Shutdown of recorded processes.
//!
//! Reads the state file, signals every recorded PID and waits for the processes to go away.
//! The file is consumed once nothing recorded in it is left alive; PIDs that outlive the stop
//! stay recorded so a later `stop --force` can still reach them. Per-PID failures are
//! reported, never fatal.

use crate::model::{HarnessEvent, SignalOutcome, StopEntry, StopReport};
use crate::pidfile::{self, RecordedPid};
use crate::process;
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

const KILL_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub(crate) struct StopOptions {
    /// How long to wait for SIGTERM to take effect.
    pub timeout: Duration,
    /// Escalate to SIGKILL once `timeout` elapses.
    pub force: bool,
}

pub(crate) async fn stop(
    pid_file: &Path,
    opts: StopOptions,
    event_tx: &UnboundedSender<HarnessEvent>,
) -> Result<StopReport> {
    let Some(recorded) = pidfile::read(pid_file)? else {
        debug!("no state file at {}", pid_file.display());
        return Ok(StopReport::default());
    };

    let mut entries = Vec::with_capacity(recorded.len());
    for r in &recorded {
        // A dead or zombie PID is reported as gone without signalling it.
        let outcome = if process::is_alive(r.pid) {
            process::terminate(r.pid)
        } else {
            SignalOutcome::AlreadyGone
        };
        let _ = event_tx.send(HarnessEvent::Signalled {
            pid: r.pid,
            role: r.role,
            outcome: outcome.clone(),
        });
        entries.push(StopEntry {
            pid: r.pid,
            role: r.role,
            outcome,
            still_running: false,
        });
    }

    let deadline = tokio::time::Instant::now() + opts.timeout;
    for entry in entries
        .iter_mut()
        .filter(|e| e.outcome == SignalOutcome::Terminated)
    {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if process::wait_for_exit(entry.pid, remaining).await {
            continue;
        }
        if opts.force {
            process::force_kill(entry.pid);
            entry.still_running = !process::wait_for_exit(entry.pid, KILL_SETTLE).await;
        } else {
            entry.still_running = true;
        }
        let _ = event_tx.send(HarnessEvent::StillRunning {
            pid: entry.pid,
            killed: opts.force,
        });
    }

    let survivors: Vec<RecordedPid> = recorded
        .iter()
        .zip(&entries)
        .filter(|(_, e)| e.survived())
        .map(|(r, _)| *r)
        .collect();
    if !survivors.is_empty() {
        debug!(
            "keeping {} surviving pid(s) in {}",
            survivors.len(),
            pid_file.display()
        );
    }
    pidfile::retain(pid_file, &survivors)?;
    Ok(StopReport {
        state_file_found: true,
        entries,
    })
}
