use crate::model::ProcessRole;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup/fetch failures. Carried inside `anyhow::Error`; callers downcast when they
/// need to tell the cases apart.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{role} directory not found: {}", path.display())]
    MissingDirectory { role: ProcessRole, path: PathBuf },

    #[error("failed to launch {role}: {reason}")]
    LaunchFailed { role: ProcessRole, reason: String },

    #[error("{role} exited during startup ({status})")]
    ExitedDuringStartup { role: ProcessRole, status: String },

    #[error("processes from the previous run are still running: {pids:?}")]
    PreviousRunAlive { pids: Vec<i32> },

    #[error("invalid style name {0:?}")]
    InvalidStyle(String),

    #[error("failed to download weights for {style}: {reason}")]
    DownloadFailed { style: String, reason: String },
}
