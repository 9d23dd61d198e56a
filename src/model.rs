use serde::Serialize;
use std::path::PathBuf;

/// The two managed processes. Order matches the state file: model first, bot second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Model,
    Bot,
}

impl ProcessRole {
    pub const ALL: [ProcessRole; 2] = [ProcessRole::Model, ProcessRole::Bot];

    /// Role for a zero-based state-file line, if the line has one.
    pub fn from_line_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            ProcessRole::Model => "model server",
            ProcessRole::Bot => "bot server",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of sending a termination signal to one recorded PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Terminated,
    AlreadyGone,
    Failed(String),
}

/// Events emitted by the launcher, terminator and fetcher, consumed by the CLI layer.
#[derive(Debug, Clone)]
pub enum HarnessEvent {
    Launched {
        role: ProcessRole,
        pid: u32,
    },
    RolledBack {
        role: ProcessRole,
        pid: u32,
    },
    Signalled {
        pid: i32,
        role: Option<ProcessRole>,
        outcome: SignalOutcome,
    },
    StillRunning {
        pid: i32,
        killed: bool,
    },
    FetchSkipped {
        style: String,
        path: PathBuf,
    },
    FetchStarted {
        style: String,
        url: String,
    },
    Fetched {
        style: String,
        path: PathBuf,
        bytes: u64,
    },
    Info(String),
}

impl HarnessEvent {
    /// Render a human-readable console line.
    pub fn to_message(&self) -> String {
        match self {
            HarnessEvent::Launched { role, pid } => {
                format!("Started {} (pid {})", role, pid)
            }
            HarnessEvent::RolledBack { role, pid } => {
                format!("Stopped {} (pid {}) after failed startup", role, pid)
            }
            HarnessEvent::Signalled { pid, role, outcome } => {
                let who = match role {
                    Some(r) => format!("{} (pid {})", r, pid),
                    None => format!("pid {}", pid),
                };
                match outcome {
                    SignalOutcome::Terminated => format!("Sent SIGTERM to {}", who),
                    SignalOutcome::AlreadyGone => format!("{} is not running", who),
                    SignalOutcome::Failed(err) => format!("Could not stop {}: {}", who, err),
                }
            }
            HarnessEvent::StillRunning { pid, killed } => {
                if *killed {
                    format!("pid {} ignored SIGTERM, sent SIGKILL", pid)
                } else {
                    format!("pid {} is still running (use --force to kill it)", pid)
                }
            }
            HarnessEvent::FetchSkipped { style, path } => {
                format!("{}: weights present at {}", style, path.display())
            }
            HarnessEvent::FetchStarted { style, url } => {
                format!("{}: downloading {}", style, url)
            }
            HarnessEvent::Fetched { style, path, bytes } => {
                format!("{}: saved {} bytes to {}", style, bytes, path.display())
            }
            HarnessEvent::Info(msg) => msg.clone(),
        }
    }

    /// Whether the CLI should route this line to stderr.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            HarnessEvent::StillRunning { .. }
                | HarnessEvent::Signalled {
                    outcome: SignalOutcome::Failed(_),
                    ..
                }
        )
    }
}

/// PIDs of a completed launch, in state-file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSummary {
    pub model_pid: u32,
    pub bot_pid: u32,
}

#[derive(Debug, Clone)]
pub struct StopEntry {
    pub pid: i32,
    pub role: Option<ProcessRole>,
    pub outcome: SignalOutcome,
    /// Still alive once the stop timeout elapsed.
    pub still_running: bool,
}

impl StopEntry {
    /// The process may still be alive: it outlived the timeout or could not be signalled.
    pub fn survived(&self) -> bool {
        self.still_running || matches!(self.outcome, SignalOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub state_file_found: bool,
    pub entries: Vec<StopEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent(PathBuf),
    Downloaded { path: PathBuf, bytes: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub pid: i32,
    pub role: Option<ProcessRole>,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub pid_file: PathBuf,
    pub entries: Vec<StatusEntry>,
}
