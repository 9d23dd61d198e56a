//! Pretrained CycleGAN checkpoint fetcher.
//!
//! A style `S` is stored at `<checkpoints>/<S>_pretrained/latest_net_G.pth` and fetched from
//! `<base_url>/<S>.pth`. A file that is already present is never re-fetched.

use crate::config::WeightsSpec;
use crate::error::HarnessError;
use crate::model::{FetchOutcome, HarnessEvent};
use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const WEIGHT_FILE_NAME: &str = "latest_net_G.pth";

/// Reject names that could escape the checkpoints directory.
pub fn validate_style(style: &str) -> Result<(), HarnessError> {
    let bad = style.is_empty()
        || style.contains('/')
        || style.contains('\\')
        || style.contains("..")
        || style.trim() != style;
    if bad {
        return Err(HarnessError::InvalidStyle(style.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct WeightFetcher {
    http: reqwest::Client,
    spec: WeightsSpec,
}

impl WeightFetcher {
    pub fn new(spec: &WeightsSpec) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(spec.user_agent.clone())
            .timeout(spec.timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            spec: spec.clone(),
        })
    }

    pub fn style_dir(&self, style: &str) -> PathBuf {
        self.spec
            .checkpoints_dir
            .join(format!("{}_pretrained", style))
    }

    pub fn weight_path(&self, style: &str) -> PathBuf {
        self.style_dir(style).join(WEIGHT_FILE_NAME)
    }

    pub fn url_for(&self, style: &str) -> String {
        format!("{}/{}.pth", self.spec.base_url, style)
    }

    /// Fetch every style in order, stopping at the first failure.
    pub async fn fetch_all(
        &self,
        styles: &[String],
        event_tx: &mpsc::UnboundedSender<HarnessEvent>,
    ) -> Result<Vec<FetchOutcome>> {
        let mut out = Vec::with_capacity(styles.len());
        for style in styles {
            out.push(self.fetch(style, event_tx).await?);
        }
        Ok(out)
    }

    /// Make sure the weights for `style` are on disk.
    pub async fn fetch(
        &self,
        style: &str,
        event_tx: &mpsc::UnboundedSender<HarnessEvent>,
    ) -> Result<FetchOutcome> {
        validate_style(style)?;

        let path = self.weight_path(style);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = event_tx.send(HarnessEvent::FetchSkipped {
                style: style.to_string(),
                path: path.clone(),
            });
            return Ok(FetchOutcome::AlreadyPresent(path));
        }

        let dir = self.style_dir(style);
        let created_dir = !tokio::fs::try_exists(&dir).await.unwrap_or(false);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
        let part = dir.join(format!("{}.part", WEIGHT_FILE_NAME));

        let url = self.url_for(style);
        let _ = event_tx.send(HarnessEvent::FetchStarted {
            style: style.to_string(),
            url: url.clone(),
        });

        let res = match self.download(&url, &part).await {
            Ok(bytes) => tokio::fs::rename(&part, &path)
                .await
                .with_context(|| format!("move {} into place", part.display()))
                .map(|_| bytes),
            Err(e) => Err(e),
        };

        match res {
            Ok(bytes) => {
                let _ = event_tx.send(HarnessEvent::Fetched {
                    style: style.to_string(),
                    path: path.clone(),
                    bytes,
                });
                Ok(FetchOutcome::Downloaded { path, bytes })
            }
            Err(e) => {
                cleanup(&dir, &part, created_dir).await;
                Err(HarnessError::DownloadFailed {
                    style: style.to_string(),
                    reason: format!("{e:#}"),
                }
                .into())
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await.context("request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status, url);
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let b = chunk.context("read response body")?;
            file.write_all(&b)
                .await
                .with_context(|| format!("write {}", dest.display()))?;
            written += b.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        debug!("downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

/// Undo a failed fetch: drop the directory if this fetch created it, otherwise only the
/// partial file.
async fn cleanup(dir: &Path, part: &Path, created_dir: bool) {
    let res = if created_dir {
        tokio::fs::remove_dir_all(dir).await
    } else {
        match tokio::fs::remove_file(part).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    };
    if let Err(e) = res {
        warn!("cleanup after failed download left {}: {e}", dir.display());
    }
}
