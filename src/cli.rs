use crate::config::{HarnessConfig, RunConfig};
use crate::model::HarnessEvent;
use crate::orchestrator::{self, StopOptions};
use crate::text_summary::{self, TextSummary};
use crate::weights::WeightFetcher;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Render harness events as console lines until the sender side is dropped.
fn spawn_event_printer(
    mut evt_rx: mpsc::UnboundedReceiver<HarnessEvent>,
    out_tx: Option<mpsc::UnboundedSender<OutputLine>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            // Silent mode: consume without printing.
            let Some(tx) = out_tx.as_ref() else { continue };
            let msg = ev.to_message();
            let line = if ev.is_failure() {
                OutputLine::Stderr(msg)
            } else {
                OutputLine::Stdout(msg)
            };
            let _ = tx.send(line);
        }
    })
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "stylectl",
    version,
    about = "Start, stop and provision the style-transfer model server and bot"
)]
pub struct Cli {
    /// Path to a stylectl.toml (default: ./stylectl.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory relative paths resolve against (default: current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub silent: bool,

    /// More diagnostics on stderr (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Stop any previous run, fetch missing weights, then start the model server and the bot
    Run,

    /// Stop the processes recorded in the state file
    Stop {
        /// Send SIGKILL to processes still alive after the timeout
        #[arg(long)]
        force: bool,

        /// How long to wait for processes to exit (overrides stop_timeout)
        #[arg(long)]
        timeout: Option<humantime::Duration>,
    },

    /// Download pretrained weights that are not present yet
    Fetch {
        /// Style names, e.g. style_monet (default: the configured styles)
        styles: Vec<String>,
    },

    /// Show the recorded processes and whether they are alive
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Load the config file (if any) and resolve it against the invocation root.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    let root = match &args.root {
        Some(r) => r.clone(),
        None => std::env::current_dir().context("get current directory")?,
    };
    let (file_cfg, source) = HarnessConfig::load(args.config.as_deref(), &root)?;
    match source {
        Some(p) => debug!("using config {}", p.display()),
        None => debug!("no config file found, using defaults"),
    }
    Ok(file_cfg.resolve(&root))
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<HarnessEvent>();
    let printer = spawn_event_printer(evt_rx, (!args.silent).then(|| out_tx.clone()));

    let result = run_command(&args.command, &cfg, &evt_tx).await;

    // Flush progress lines before the closing summary.
    drop(evt_tx);
    let _ = printer.await;

    if let Ok(Some(summary)) = &result {
        if !args.silent {
            for line in &summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line.clone()));
            }
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    result.map(|_| ())
}

async fn run_command(
    command: &Command,
    cfg: &RunConfig,
    evt_tx: &mpsc::UnboundedSender<HarnessEvent>,
) -> Result<Option<TextSummary>> {
    match command {
        Command::Run => {
            let summary = orchestrator::launch(cfg, evt_tx).await?;
            Ok(Some(text_summary::build_launch_summary(
                &summary,
                &cfg.pid_file,
            )))
        }
        Command::Stop { force, timeout } => {
            let opts = StopOptions {
                timeout: timeout.clone().map(Duration::from).unwrap_or(cfg.stop_timeout),
                force: *force,
            };
            let report = orchestrator::stop(&cfg.pid_file, opts, evt_tx).await?;
            Ok(Some(text_summary::build_stop_summary(&report)))
        }
        Command::Fetch { styles } => {
            let styles = if styles.is_empty() {
                cfg.weights.styles.clone()
            } else {
                styles.clone()
            };
            let fetcher = WeightFetcher::new(&cfg.weights)?;
            fetcher.fetch_all(&styles, evt_tx).await?;
            Ok(None)
        }
        Command::Status { json } => {
            let report = orchestrator::collect_status(&cfg.pid_file)?;
            if *json {
                let out = serde_json::to_string_pretty(&report)?;
                Ok(Some(TextSummary { lines: vec![out] }))
            } else {
                Ok(Some(text_summary::build_status_summary(&report)))
            }
        }
    }
}
