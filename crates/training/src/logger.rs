//! Epoch metric logging to tracing and an optional JSON-lines file.

use crate::metrics::{MetricKind, MetricSummary, Stage};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One logged value, as written to the metrics file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricRecord {
    pub epoch: usize,
    pub stage: Stage,
    /// `{stage}/{metric}`, e.g. `val/accuracy`.
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Default)]
pub struct MetricsLogger {
    path: Option<PathBuf>,
    file: Option<File>,
    history: Vec<MetricRecord>,
}

impl MetricsLogger {
    /// Logger that only emits tracing events and keeps history in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Also append JSON lines to `path` (parent directories are created).
    pub fn with_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| anyhow::anyhow!("failed to open metrics file {}: {e}", path.display()))?;
        Ok(Self {
            path: Some(path),
            file: Some(file),
            history: Vec::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn history(&self) -> &[MetricRecord] {
        &self.history
    }

    /// Most recent value logged under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.history
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }

    pub fn log(&mut self, epoch: usize, stage: Stage, metric: &str, value: f64) {
        let name = format!("{stage}/{metric}");
        if stage.prog_bar() {
            tracing::info!(epoch, metric = %name, value = format_args!("{value:.4}"));
        } else {
            tracing::debug!(epoch, metric = %name, value = format_args!("{value:.4}"));
        }
        let record = MetricRecord {
            epoch,
            stage,
            name,
            value,
        };
        if let Some(file) = self.file.as_mut() {
            let line = serde_json::json!({
                "epoch": record.epoch,
                "stage": record.stage.as_str(),
                "name": record.name,
                "value": record.value,
            });
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!("failed to write metrics record: {e}");
                self.file = None;
            }
        }
        self.history.push(record);
    }

    /// Log the epoch loss (when any batch contributed) and every metric of a summary.
    pub fn log_summary(&mut self, epoch: usize, stage: Stage, summary: &MetricSummary) {
        if let Some(loss) = summary.loss {
            self.log(epoch, stage, "loss", loss);
        }
        for kind in MetricKind::ALL {
            self.log(epoch, stage, kind.name(), summary.get(kind));
        }
    }
}
