#![recursion_limit = "256"]

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod logger;
pub mod metrics;
pub mod task;
pub mod util;

pub use classifier::{argmax_classes, EcgClassifier, EcgClassifierConfig};
pub use config::{ConfigError, TrainConfig};
pub use dataset::{EcgDataModule, SplitDataset};
pub use logger::{MetricRecord, MetricsLogger};
pub use metrics::{ClassificationMetrics, ConfusionMatrix, MetricKind, MetricSummary, Stage};
pub use task::ClassifierTask;
pub use util::{
    run_eval, run_predict, run_summary, run_train, EvalArgs, PredictArgs, SummaryArgs, TrainArgs,
};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
