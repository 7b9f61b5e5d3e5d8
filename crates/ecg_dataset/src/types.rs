//! Core types, error definitions, and data structures for ecg_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("class directory missing for {class}: {path}")]
    MissingClassDir { class: EcgClass, path: PathBuf },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid crop {crop:?}: {msg}")]
    InvalidCrop { crop: CropRect, msg: String },
    #[error("index {index} out of range for dataset of {len} samples")]
    OutOfRange { index: usize, len: usize },
    #[error("no images found under {0}")]
    EmptyDataset(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// Diagnostic class of an ECG scan. Discriminants are the training label ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EcgClass {
    /// Myocardial infarction.
    Mi = 0,
    /// Patient with a history of myocardial infarction.
    Pmi = 1,
    /// Abnormal heartbeat.
    Hb = 2,
    Normal = 3,
}

impl EcgClass {
    pub const ALL: [EcgClass; 4] = [EcgClass::Mi, EcgClass::Pmi, EcgClass::Hb, EcgClass::Normal];
    pub const COUNT: usize = Self::ALL.len();

    pub fn label(self) -> usize {
        self as usize
    }

    pub fn from_label(label: usize) -> Option<Self> {
        Self::ALL.get(label).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EcgClass::Mi => "MI",
            EcgClass::Pmi => "PMI",
            EcgClass::Hb => "HB",
            EcgClass::Normal => "Normal",
        }
    }

    /// Subdirectory of the dataset root holding this class's images.
    pub fn dir_name(self) -> &'static str {
        match self {
            EcgClass::Mi => "ECG Images of Myocardial Infarction Patients (240x12=2880)",
            EcgClass::Pmi => "ECG Images of Patient that have History of MI (172x12=2064)",
            EcgClass::Hb => "ECG Images of Patient that have abnormal heartbeat (233x12=2796)",
            EcgClass::Normal => "Normal Person ECG Images (284x12=3408)",
        }
    }
}

impl fmt::Display for EcgClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crop box in pixels, interpreted like a PIL crop box: `right` and `lower` are exclusive.
/// Parts of the box that fall outside the source image come back black.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub left: i64,
    pub upper: i64,
    pub right: i64,
    pub lower: i64,
}

impl CropRect {
    pub fn new(left: i64, upper: i64, right: i64, lower: i64) -> DatasetResult<Self> {
        let crop = Self {
            left,
            upper,
            right,
            lower,
        };
        crop.validate()?;
        Ok(crop)
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.right <= self.left {
            return Err(DatasetError::InvalidCrop {
                crop: *self,
                msg: "right must be greater than left".to_string(),
            });
        }
        if self.lower <= self.upper {
            return Err(DatasetError::InvalidCrop {
                crop: *self,
                msg: "lower must be greater than upper".to_string(),
            });
        }
        if self.width() > u32::MAX as u64 || self.height() > u32::MAX as u64 {
            return Err(DatasetError::InvalidCrop {
                crop: *self,
                msg: "crop is too large".to_string(),
            });
        }
        Ok(())
    }

    /// Extent of the box; 0 when inverted.
    pub fn width(&self) -> u64 {
        span(self.left, self.right)
    }

    pub fn height(&self) -> u64 {
        span(self.upper, self.lower)
    }
}

fn span(start: i64, end: i64) -> u64 {
    (end as i128 - start as i128).clamp(0, u64::MAX as i128) as u64
}

/// One discovered image and its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub path: PathBuf,
    pub class: EcgClass,
}

/// A decoded (and possibly cropped) image paired with its class.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    pub image: image::RgbImage,
    pub label: EcgClass,
}

/// Transformed sample ready for batching.
#[derive(Debug, Clone)]
pub struct EcgSample {
    /// Position of the sample in the source it was loaded from.
    pub index: usize,
    /// Image in CHW layout.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub label: EcgClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMode {
    /// Stretch to fill the target dimensions.
    Force,
    /// Preserve aspect ratio; pad to target with zeros.
    Letterbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: EcgClass,
    pub dir: PathBuf,
    pub present: bool,
    pub images: usize,
    /// Directory entries that were not `.jpg` files.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub root: PathBuf,
    pub classes: Vec<ClassSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    /// Fail when any class has fewer images than this.
    pub min_per_class: Option<usize>,
    /// Fail when largest/smallest class count exceeds this ratio.
    pub max_imbalance_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            min_per_class: parse("ECG_DATASET_MIN_PER_CLASS"),
            max_imbalance_ratio: parse("ECG_DATASET_MAX_IMBALANCE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
