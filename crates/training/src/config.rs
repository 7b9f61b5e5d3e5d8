use crate::classifier::EcgClassifierConfig;
use ecg_dataset::{CropRect, TransformConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_NAME: &str = "ecg-train.toml";
pub const CONFIG_ENV: &str = "ECG_TRAIN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a training run needs. Every field may be omitted from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub dataset_root: PathBuf,
    pub crop: Option<CropRect>,
    pub val_ratio: f32,
    pub test_ratio: f32,
    pub split_seed: u64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for batch shuffling and augmentation; None draws from the OS.
    pub seed: Option<u64>,
    /// Transform for the training split; val/test use it with augmentation disabled.
    pub transform: TransformConfig,
    pub model: EcgClassifierConfig,
    pub checkpoint_dir: PathBuf,
    pub metrics_path: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("data/ecg"),
            crop: None,
            val_ratio: 0.15,
            test_ratio: 0.15,
            split_seed: 42,
            epochs: 10,
            batch_size: 16,
            seed: None,
            transform: TransformConfig {
                flip_horizontal_prob: 0.0,
                color_jitter_prob: 0.3,
                noise_prob: 0.1,
                ..TransformConfig::default()
            },
            model: EcgClassifierConfig::default(),
            checkpoint_dir: PathBuf::from("checkpoints"),
            metrics_path: PathBuf::from("logs/metrics.jsonl"),
        }
    }
}

impl TrainConfig {
    /// Resolve the config file: explicit path, then `ECG_TRAIN_CONFIG`, then `ecg-train.toml`
    /// in the working directory. Without any file the defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            return Self::from_path(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg: TrainConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "loaded training config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.model.num_classes == 0 {
            return Err(ConfigError::Invalid("model.num_classes must be at least 1".into()));
        }
        if !(self.model.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "model.learning_rate {} must be positive",
                self.model.learning_rate
            )));
        }
        if let Some(crop) = &self.crop {
            crop.validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.val_ratio + self.test_ratio >= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "val_ratio {} + test_ratio {} leaves no training data",
                self.val_ratio, self.test_ratio
            )));
        }
        Ok(())
    }

    pub fn best_checkpoint(&self) -> PathBuf {
        self.checkpoint_dir.join("ecg_classifier_best.bin")
    }

    pub fn last_checkpoint(&self) -> PathBuf {
        self.checkpoint_dir.join("ecg_classifier_last.bin")
    }

    /// Checkpoint used when none is named: the best one if it was written, else the last.
    /// Runs without a validation split never write a best checkpoint.
    pub fn resolve_checkpoint(&self) -> PathBuf {
        let best = self.best_checkpoint();
        if best.exists() {
            best
        } else {
            self.last_checkpoint()
        }
    }
}
