//! Harness configuration.
//!
//! `stylectl.toml` is optional and every key in it is optional. The file is looked up at
//! `--config`, then `<root>/stylectl.toml`, then the platform config directory. Relative
//! paths are resolved against the invocation root when a [`RunConfig`] is built.

use crate::model::ProcessRole;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "stylectl.toml";
pub const DEFAULT_WEIGHTS_BASE_URL: &str =
    "http://efrosgans.eecs.berkeley.edu/cyclegan/pretrained_models";
pub const DEFAULT_STYLES: [&str; 4] = ["style_monet", "style_cezanne", "style_ukiyoe", "style_vangogh"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub pid_file: PathBuf,
    /// A process that exits within this window counts as a failed launch.
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    pub model: AppConfig,
    pub bot: AppConfig,
    pub weights: WeightsConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("pids.txt"),
            startup_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            model: AppConfig::default(),
            bot: AppConfig::default(),
            weights: WeightsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Working directory; defaults to `model_app` / `bot_app` depending on the role.
    pub dir: Option<PathBuf>,
    pub program: String,
    pub args: Vec<String>,
    /// Relative to `dir`.
    pub log_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dir: None,
            program: "python".into(),
            args: vec!["app.py".into()],
            log_file: PathBuf::from("nohup.out"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub base_url: String,
    /// Relative to the model directory.
    pub checkpoints_dir: PathBuf,
    pub styles: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEIGHTS_BASE_URL.into(),
            checkpoints_dir: PathBuf::from("checkpoints"),
            styles: DEFAULT_STYLES.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(600),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse harness config")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("in {}", path.display()))
    }

    /// Locate and load the config. Returns the defaults (and `None`) when no file is found;
    /// an explicitly requested file must exist.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(p) = explicit {
            return Ok((Self::from_path(p)?, Some(p.to_path_buf())));
        }
        let candidates = [
            Some(root.join(CONFIG_FILE_NAME)),
            dirs::config_dir().map(|d| d.join("stylectl").join(CONFIG_FILE_NAME)),
        ];
        for p in candidates.into_iter().flatten() {
            if p.is_file() {
                return Ok((Self::from_path(&p)?, Some(p)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Resolve every path against `root`.
    pub fn resolve(&self, root: &Path) -> RunConfig {
        let model = AppSpec::resolve(ProcessRole::Model, &self.model, root);
        let bot = AppSpec::resolve(ProcessRole::Bot, &self.bot, root);
        let weights = WeightsSpec {
            base_url: self.weights.base_url.trim_end_matches('/').to_string(),
            checkpoints_dir: model.dir.join(&self.weights.checkpoints_dir),
            styles: self.weights.styles.clone(),
            timeout: self.weights.timeout,
            user_agent: format!("stylectl/{}", env!("CARGO_PKG_VERSION")),
        };
        RunConfig {
            root: root.to_path_buf(),
            pid_file: root.join(&self.pid_file),
            startup_grace: self.startup_grace,
            stop_timeout: self.stop_timeout,
            model,
            bot,
            weights,
        }
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root: PathBuf,
    pub pid_file: PathBuf,
    pub startup_grace: Duration,
    pub stop_timeout: Duration,
    pub model: AppSpec,
    pub bot: AppSpec,
    pub weights: WeightsSpec,
}

impl RunConfig {
    pub fn app(&self, role: ProcessRole) -> &AppSpec {
        match role {
            ProcessRole::Model => &self.model,
            ProcessRole::Bot => &self.bot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppSpec {
    pub role: ProcessRole,
    pub dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub log_file: PathBuf,
}

impl AppSpec {
    fn resolve(role: ProcessRole, cfg: &AppConfig, root: &Path) -> Self {
        let dir = match &cfg.dir {
            Some(d) => root.join(d),
            None => root.join(match role {
                ProcessRole::Model => "model_app",
                ProcessRole::Bot => "bot_app",
            }),
        };
        Self {
            role,
            log_file: dir.join(&cfg.log_file),
            dir,
            program: cfg.program.clone(),
            args: cfg.args.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeightsSpec {
    pub base_url: String,
    pub checkpoints_dir: PathBuf,
    pub styles: Vec<String>,
    pub timeout: Duration,
    pub user_agent: String,
}
