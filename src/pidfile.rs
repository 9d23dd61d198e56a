//! The PID state file: one process identifier per line, model server first, bot second.

use crate::model::ProcessRole;
use anyhow::{Context, Result};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// One usable line of the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedPid {
    pub pid: i32,
    pub role: Option<ProcessRole>,
    /// Zero-based line the PID was read from.
    pub line: usize,
}

/// Parse state-file contents. Lines that are not an integer greater than zero are skipped;
/// roles follow the raw line position.
pub fn parse(contents: &str) -> Vec<RecordedPid> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let pid = line.trim().parse::<i32>().ok().filter(|p| *p > 0)?;
            Some(RecordedPid {
                pid,
                role: ProcessRole::from_line_index(idx),
                line: idx,
            })
        })
        .collect()
}

/// Read the state file. `Ok(None)` when it does not exist.
pub fn read(path: &Path) -> Result<Option<Vec<RecordedPid>>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(parse(&s))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read state file {}", path.display())),
    }
}

/// Append one PID, creating the file if needed. Synced before returning so a crash right
/// after a launch still leaves the PID on disk.
pub fn append(path: &Path, pid: u32) -> Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open state file {}", path.display()))?;
    writeln!(f, "{}", pid).with_context(|| format!("write state file {}", path.display()))?;
    f.sync_all()
        .with_context(|| format!("sync state file {}", path.display()))?;
    Ok(())
}

/// Replace the state file with just `keep`, each PID on its original line so roles survive.
/// Vacated lines are left blank. An empty `keep` deletes the file.
pub fn retain(path: &Path, keep: &[RecordedPid]) -> Result<()> {
    let Some(last) = keep.iter().map(|r| r.line).max() else {
        remove(path)?;
        return Ok(());
    };
    let mut lines = vec![String::new(); last + 1];
    for r in keep {
        lines[r.line] = r.pid.to_string();
    }
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("open state file {}", path.display()))?;
    for line in &lines {
        writeln!(f, "{}", line).with_context(|| format!("write state file {}", path.display()))?;
    }
    f.sync_all()
        .with_context(|| format!("sync state file {}", path.display()))?;
    Ok(())
}

/// Delete the state file. Returns whether a file was removed.
pub fn remove(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("remove state file {}", path.display())),
    }
}
