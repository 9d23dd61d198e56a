//! Launch sequence.
//!
//! Prior cleanup, weight fetch, then model server and bot in order. Every launched process is
//! held by a [`LaunchGuard`] until the whole sequence succeeds; any failure after the first
//! launch stops what was started and removes the partial state file.

use super::terminator::{stop, StopOptions};
use crate::config::{AppSpec, RunConfig};
use crate::error::HarnessError;
use crate::model::{HarnessEvent, LaunchSummary, ProcessRole};
use crate::pidfile;
use crate::process::{self, ManagedProcess};
use crate::weights::WeightFetcher;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Processes launched in this sequence together with the state file recording them.
/// Rolled back on drop unless committed.
pub(crate) struct LaunchGuard {
    pid_file: PathBuf,
    procs: Vec<ManagedProcess>,
    armed: bool,
}

impl LaunchGuard {
    pub(crate) fn new(pid_file: PathBuf) -> Self {
        Self {
            pid_file,
            procs: Vec::new(),
            armed: true,
        }
    }

    /// Take ownership of a launched process and append its PID to the state file.
    pub(crate) fn record(&mut self, proc: ManagedProcess) -> Result<u32> {
        let pid = proc.pid;
        self.procs.push(proc);
        pidfile::append(&self.pid_file, pid)?;
        Ok(pid)
    }

    /// The sequence succeeded: leave the processes running.
    pub(crate) fn commit(mut self) {
        self.armed = false;
        for proc in std::mem::take(&mut self.procs) {
            proc.detach();
        }
    }

    /// Stop everything launched so far, newest first, and delete the state file.
    pub(crate) async fn rollback(
        mut self,
        timeout: Duration,
        event_tx: &UnboundedSender<HarnessEvent>,
    ) {
        self.armed = false;
        while let Some(proc) = self.procs.pop() {
            let (role, pid) = (proc.role, proc.pid);
            proc.shutdown(timeout).await;
            let _ = event_tx.send(HarnessEvent::RolledBack { role, pid });
        }
        if let Err(e) = pidfile::remove(&self.pid_file) {
            warn!("{e:#}");
        }
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for proc in &mut self.procs {
            proc.start_kill();
        }
        let _ = std::fs::remove_file(&self.pid_file);
    }
}

fn ensure_dir(app: &AppSpec) -> Result<(), HarnessError> {
    if app.dir.is_dir() {
        Ok(())
    } else {
        Err(HarnessError::MissingDirectory {
            role: app.role,
            path: app.dir.clone(),
        })
    }
}

/// Start both processes and record their PIDs. On success the state file holds the model PID
/// then the bot PID.
pub(crate) async fn launch(
    cfg: &RunConfig,
    event_tx: &UnboundedSender<HarnessEvent>,
) -> Result<LaunchSummary> {
    ensure_dir(&cfg.model)?;

    // Whatever a previous run left behind goes first, so ports and GPU memory are free.
    let prior = stop(
        &cfg.pid_file,
        StopOptions {
            timeout: cfg.stop_timeout,
            force: true,
        },
        event_tx,
    )
    .await
    .context("clean up previous run")?;
    if prior.state_file_found {
        debug!("stopped {} process(es) from a previous run", prior.entries.len());
    }
    // Survivors stay in the state file; launching now would orphan them.
    let survivors: Vec<i32> = prior
        .entries
        .iter()
        .filter(|e| e.survived())
        .map(|e| e.pid)
        .collect();
    if !survivors.is_empty() {
        return Err(HarnessError::PreviousRunAlive { pids: survivors }.into());
    }

    if !cfg.weights.styles.is_empty() {
        let fetcher = WeightFetcher::new(&cfg.weights)?;
        fetcher.fetch_all(&cfg.weights.styles, event_tx).await?;
    }

    let mut guard = LaunchGuard::new(cfg.pid_file.clone());
    match launch_all(cfg, &mut guard, event_tx).await {
        Ok(summary) => {
            guard.commit();
            Ok(summary)
        }
        Err(e) => {
            guard.rollback(cfg.stop_timeout, event_tx).await;
            Err(e)
        }
    }
}

async fn launch_all(
    cfg: &RunConfig,
    guard: &mut LaunchGuard,
    event_tx: &UnboundedSender<HarnessEvent>,
) -> Result<LaunchSummary> {
    let mut pids = Vec::with_capacity(ProcessRole::ALL.len());
    for role in ProcessRole::ALL {
        pids.push(launch_one(cfg.app(role), cfg.startup_grace, guard, event_tx).await?);
    }
    Ok(LaunchSummary {
        model_pid: pids[0],
        bot_pid: pids[1],
    })
}

async fn launch_one(
    app: &AppSpec,
    grace: Duration,
    guard: &mut LaunchGuard,
    event_tx: &UnboundedSender<HarnessEvent>,
) -> Result<u32> {
    ensure_dir(app)?;
    let mut proc = process::spawn_detached(app).await?;
    if let Err(e) = proc.wait_startup(grace).await {
        let _ = event_tx.send(HarnessEvent::Info(format!(
            "{} output is in {}",
            app.role,
            app.log_file.display()
        )));
        return Err(e.into());
    }
    let pid = guard
        .record(proc)
        .with_context(|| format!("record {} pid", app.role))?;
    let _ = event_tx.send(HarnessEvent::Launched { role: app.role, pid });
    Ok(pid)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::orchestrator::testutil;
    use tokio::sync::mpsc;

    fn harness_err(e: &anyhow::Error) -> &HarnessError {
        e.downcast_ref::<HarnessError>()
            .unwrap_or_else(|| panic!("not a HarnessError: {e:#}"))
    }

    async fn cleanup(cfg: &RunConfig) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = StopOptions {
            timeout: Duration::from_secs(2),
            force: true,
        };
        stop(&cfg.pid_file, opts, &tx).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_launch_records_model_then_bot() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = launch(&cfg, &tx).await.unwrap();

        let contents = std::fs::read_to_string(&cfg.pid_file).unwrap();
        assert_eq!(
            contents,
            format!("{}\n{}\n", summary.model_pid, summary.bot_pid)
        );
        assert!(process::is_alive(summary.model_pid as i32));
        assert!(process::is_alive(summary.bot_pid as i32));

        drop(tx);
        let launched: Vec<_> = testutil::drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                HarnessEvent::Launched { role, .. } => Some(role),
                _ => None,
            })
            .collect();
        assert_eq!(launched, vec![ProcessRole::Model, ProcessRole::Bot]);

        cleanup(&cfg).await;
    }

    #[tokio::test]
    async fn bot_spawn_failure_rolls_back_model() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = testutil::config(root.path());
        cfg.bot.program = "/nonexistent/stylectl-bot".into();
        let (tx, rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::LaunchFailed {
                role: ProcessRole::Bot,
                ..
            }
        ));
        assert!(!cfg.pid_file.exists());

        drop(tx);
        let rolled_back: Vec<u32> = testutil::drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                HarnessEvent::RolledBack {
                    role: ProcessRole::Model,
                    pid,
                } => Some(pid),
                _ => None,
            })
            .collect();
        assert_eq!(rolled_back.len(), 1);
        assert!(!process::is_alive(rolled_back[0] as i32));
    }

    #[tokio::test]
    async fn bot_exiting_during_startup_rolls_back_model() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = testutil::config(root.path());
        cfg.bot.program = "sh".into();
        cfg.bot.args = vec!["-c".into(), "echo no token >&2; exit 1".into()];
        let (tx, rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::ExitedDuringStartup {
                role: ProcessRole::Bot,
                ..
            }
        ));
        assert!(!cfg.pid_file.exists());
        let log = std::fs::read_to_string(&cfg.bot.log_file).unwrap();
        assert!(log.contains("no token"));

        drop(tx);
        for ev in testutil::drain(rx) {
            if let HarnessEvent::RolledBack { pid, .. } = ev {
                assert!(!process::is_alive(pid as i32));
            }
        }
    }

    #[tokio::test]
    async fn missing_bot_dir_rolls_back_model() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());
        std::fs::remove_dir_all(&cfg.bot.dir).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::MissingDirectory {
                role: ProcessRole::Bot,
                ..
            }
        ));
        assert!(!cfg.pid_file.exists());
        drop(tx);
        assert!(testutil::drain(rx)
            .iter()
            .any(|e| matches!(e, HarnessEvent::RolledBack { role: ProcessRole::Model, .. })));
    }

    #[tokio::test]
    async fn missing_model_dir_changes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());
        std::fs::remove_dir_all(&cfg.model.dir).unwrap();
        std::fs::write(&cfg.pid_file, "not-a-pid\n").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::MissingDirectory {
                role: ProcessRole::Model,
                ..
            }
        ));
        assert_eq!(std::fs::read_to_string(&cfg.pid_file).unwrap(), "not-a-pid\n");
        drop(tx);
        assert!(testutil::drain(rx).is_empty());
    }

    #[tokio::test]
    async fn model_launch_failure_leaves_no_state_file() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = testutil::config(root.path());
        cfg.model.program = "/nonexistent/stylectl-model".into();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::LaunchFailed {
                role: ProcessRole::Model,
                ..
            }
        ));
        assert!(!cfg.pid_file.exists());
    }

    #[tokio::test]
    async fn relaunch_replaces_previous_processes() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = launch(&cfg, &tx).await.unwrap();
        let second = launch(&cfg, &tx).await.unwrap();

        assert!(!process::is_alive(first.model_pid as i32));
        assert!(!process::is_alive(first.bot_pid as i32));
        let recorded: Vec<i32> = pidfile::read(&cfg.pid_file)
            .unwrap()
            .unwrap()
            .iter()
            .map(|r| r.pid)
            .collect();
        assert_eq!(
            recorded,
            vec![second.model_pid as i32, second.bot_pid as i32]
        );

        cleanup(&cfg).await;
    }

    #[tokio::test]
    async fn weight_fetch_failure_starts_nothing() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let mut cfg = testutil::config(root.path());
        cfg.weights.base_url = server.uri();
        cfg.weights.styles = vec!["style_monet".into()];
        let (tx, rx) = mpsc::unbounded_channel();

        let err = launch(&cfg, &tx).await.unwrap_err();
        assert!(matches!(
            harness_err(&err),
            HarnessError::DownloadFailed { .. }
        ));
        assert!(!cfg.pid_file.exists());
        assert!(!cfg.weights.checkpoints_dir.join("style_monet_pretrained").exists());
        drop(tx);
        assert!(!testutil::drain(rx)
            .iter()
            .any(|e| matches!(e, HarnessEvent::Launched { .. })));
    }

    #[tokio::test]
    async fn committed_guard_leaves_processes_running() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());

        let mut guard = LaunchGuard::new(cfg.pid_file.clone());
        let proc = process::spawn_detached(&cfg.model).await.unwrap();
        let pid = guard.record(proc).unwrap();
        guard.commit();

        assert!(process::is_alive(pid as i32));
        assert_eq!(
            std::fs::read_to_string(&cfg.pid_file).unwrap(),
            format!("{pid}\n")
        );
        cleanup(&cfg).await;
    }

    #[tokio::test]
    async fn dropped_guard_kills_uncommitted_processes() {
        let root = tempfile::tempdir().unwrap();
        let cfg = testutil::config(root.path());

        let pid = {
            let mut guard = LaunchGuard::new(cfg.pid_file.clone());
            let proc = process::spawn_detached(&cfg.model).await.unwrap();
            guard.record(proc).unwrap()
        };

        assert!(!cfg.pid_file.exists());
        assert!(process::wait_for_exit(pid as i32, Duration::from_secs(2)).await);
    }
}
