//! Spawning detached children and signalling recorded PIDs.

use crate::config::AppSpec;
use crate::error::HarnessError;
use crate::model::{ProcessRole, SignalOutcome};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A child we launched and still hold a handle to. Dropping it does not kill the process.
#[derive(Debug)]
pub struct ManagedProcess {
    pub role: ProcessRole,
    pub pid: u32,
    child: Child,
}

impl ManagedProcess {
    /// Wait out the startup grace period. A process that exits inside it failed to launch.
    pub async fn wait_startup(&mut self, grace: Duration) -> Result<(), HarnessError> {
        let exited = if grace.is_zero() {
            self.child.try_wait().ok().flatten()
        } else {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!(pid = self.pid, "wait on child failed: {e}");
                    None
                }
                Err(_) => None,
            }
        };
        match exited {
            Some(status) => Err(HarnessError::ExitedDuringStartup {
                role: self.role,
                status: status.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Terminate and reap: SIGTERM, then SIGKILL once `timeout` elapses.
    pub async fn shutdown(mut self, timeout: Duration) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        let _ = terminate(self.pid as i32);
        if tokio::time::timeout(timeout, self.child.wait()).await.is_err() {
            debug!(pid = self.pid, "child ignored SIGTERM, killing");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }

    /// Non-blocking SIGKILL for cleanup paths that cannot await.
    pub fn start_kill(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Give up the handle and leave the process running.
    pub fn detach(self) -> u32 {
        self.pid
    }
}

/// Launch an app as a detached background process: own process group, stdin closed, output
/// appended to the app's log file.
pub async fn spawn_detached(app: &AppSpec) -> Result<ManagedProcess, HarnessError> {
    let launch_failed = |reason: String| HarnessError::LaunchFailed {
        role: app.role,
        reason,
    };

    let log = open_log(app).map_err(|e| {
        launch_failed(format!("open log {}: {e}", app.log_file.display()))
    })?;
    let log_err = log
        .try_clone()
        .map_err(|e| launch_failed(format!("clone log handle: {e}")))?;

    let mut std_cmd = std::process::Command::new(&app.program);
    std_cmd
        .args(&app.args)
        .current_dir(&app.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: a Ctrl-C or hangup on the launching terminal must not reach it.
        std_cmd.process_group(0);
    }
    let mut cmd = Command::from(std_cmd);

    debug!(role = %app.role, program = %app.program, args = ?app.args, dir = %app.dir.display(), "spawning");
    let child = cmd
        .spawn()
        .map_err(|e| launch_failed(format!("{}: {e}", app.program)))?;
    let pid = child
        .id()
        .ok_or_else(|| launch_failed("process exited before its pid was read".into()))?;

    Ok(ManagedProcess {
        role: app.role,
        pid,
        child,
    })
}

fn open_log(app: &AppSpec) -> std::io::Result<std::fs::File> {
    use std::io::Write;

    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&app.log_file)?;
    let stamp = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into());
    writeln!(f, "=== stylectl: starting {} at {} ===", app.role, stamp)?;
    Ok(f)
}

/// Whether `pid` names a live process. Zombies count as dead.
#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => !is_zombie(pid),
        // Exists, owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesised command name, which may itself contain ')'.
    stat.rfind(')')
        .and_then(|i| stat[i + 1..].split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: i32) -> bool {
    false
}

/// Send SIGTERM to a recorded PID.
pub fn terminate(pid: i32) -> SignalOutcome {
    send(pid, false)
}

/// Send SIGKILL to a recorded PID.
pub fn force_kill(pid: i32) -> SignalOutcome {
    send(pid, true)
}

#[cfg(unix)]
fn send(pid: i32, hard: bool) -> SignalOutcome {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid <= 0 {
        return SignalOutcome::AlreadyGone;
    }
    let sig = if hard { Signal::SIGKILL } else { Signal::SIGTERM };
    match kill(Pid::from_raw(pid), sig) {
        Ok(()) => SignalOutcome::Terminated,
        Err(Errno::ESRCH) => SignalOutcome::AlreadyGone,
        Err(e) => SignalOutcome::Failed(e.desc().to_string()),
    }
}

#[cfg(not(unix))]
fn send(_pid: i32, _hard: bool) -> SignalOutcome {
    SignalOutcome::Failed("signals are not supported on this platform".into())
}

/// Poll until `pid` is gone or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
