//! ECG scan dataset loading, preprocessing, and Burn-compatible batching.
//!
//! This crate provides utilities for:
//! - Discovering labeled images in the four class directories of a dataset root
//! - Optional cropping and transform (resize/augment/normalize) preprocessing
//! - Stratified train/val/test splitting
//! - Burn-compatible batch iteration
//! - Dataset summaries and validation

pub mod aug;
pub mod source;
pub mod splits;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use aug::{
    Normalize, TransformConfig, TransformPipeline, TransformPipelineBuilder, IMAGENET_MEAN,
    IMAGENET_STD,
};
pub use source::{
    crop_image, index_classes, list_class_images, load_image, summarize_root,
    DatasetWithTransform, EcgDataset, LabeledImages, Subset,
};
pub use splits::{class_counts, split_indices, SplitIndices};
pub use types::*;
pub use validation::{summarize_root_with_thresholds, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use batch::{BatchConfig, BatchIter, EcgBatch};
