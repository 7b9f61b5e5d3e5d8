//! Discovering labeled ECG images on disk and loading them.

use crate::aug::TransformPipeline;
use crate::types::{
    ClassSummary, CropRect, DatasetError, DatasetResult, DatasetSummary, EcgClass, EcgSample,
    LabeledImage, SampleIndex,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IMAGE_SUFFIX: &str = ".jpg";

/// Random-access source of labeled images.
pub trait LabeledImages: Send + Sync {
    fn len(&self) -> usize;

    fn load(&self, index: usize) -> DatasetResult<LabeledImage>;

    /// Class of the sample at `index` without decoding the image.
    fn label(&self, index: usize) -> DatasetResult<EcgClass>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: LabeledImages + ?Sized> LabeledImages for Arc<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn load(&self, index: usize) -> DatasetResult<LabeledImage> {
        (**self).load(index)
    }

    fn label(&self, index: usize) -> DatasetResult<EcgClass> {
        (**self).label(index)
    }
}

/// Image files of one class directory, sorted by file name.
pub fn list_class_images(dir: &Path) -> DatasetResult<(Vec<PathBuf>, usize)> {
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut images = Vec::new();
    let mut skipped = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_jpg = entry.file_name().to_string_lossy().ends_with(IMAGE_SUFFIX);
        if is_jpg && path.is_file() {
            images.push(path);
        } else {
            skipped += 1;
        }
    }
    images.sort();
    Ok((images, skipped))
}

/// Scan a dataset root and pair every `.jpg` in the four class directories with its label.
pub fn index_classes(root: &Path) -> DatasetResult<Vec<SampleIndex>> {
    let mut indices = Vec::new();
    for class in EcgClass::ALL {
        let dir = root.join(class.dir_name());
        if !dir.is_dir() {
            return Err(DatasetError::MissingClassDir { class, path: dir });
        }
        let (images, skipped) = list_class_images(&dir)?;
        tracing::debug!(
            class = class.as_str(),
            images = images.len(),
            skipped,
            "indexed class directory"
        );
        indices.extend(images.into_iter().map(|path| SampleIndex { path, class }));
    }
    Ok(indices)
}

/// Count images per class without failing on missing directories.
pub fn summarize_root(root: &Path) -> DatasetResult<DatasetSummary> {
    let mut classes = Vec::with_capacity(EcgClass::COUNT);
    let mut total = 0usize;
    for class in EcgClass::ALL {
        let dir = root.join(class.dir_name());
        if !dir.is_dir() {
            classes.push(ClassSummary {
                class,
                dir,
                present: false,
                images: 0,
                skipped: 0,
            });
            continue;
        }
        let (images, skipped) = list_class_images(&dir)?;
        total += images.len();
        classes.push(ClassSummary {
            class,
            dir,
            present: true,
            images: images.len(),
            skipped,
        });
    }
    Ok(DatasetSummary {
        root: root.to_path_buf(),
        classes,
        total,
    })
}

/// Crop like PIL: the output is exactly the crop size, out-of-bounds pixels are black.
pub fn crop_image(img: &image::RgbImage, crop: &CropRect) -> DatasetResult<image::RgbImage> {
    crop.validate()?;
    let (w, h) = img.dimensions();
    let inside = crop.left >= 0
        && crop.upper >= 0
        && crop.right <= w as i64
        && crop.lower <= h as i64;
    if inside {
        let view = image::imageops::crop_imm(
            img,
            crop.left as u32,
            crop.upper as u32,
            crop.width() as u32,
            crop.height() as u32,
        );
        return Ok(view.to_image());
    }
    let mut canvas = image::RgbImage::new(crop.width() as u32, crop.height() as u32);
    let overlaps = crop.right > 0
        && crop.lower > 0
        && crop.left < w as i64
        && crop.upper < h as i64;
    if overlaps {
        image::imageops::replace(&mut canvas, img, -crop.left, -crop.upper);
    }
    Ok(canvas)
}

/// Open an image file as RGB, applying an optional crop.
pub fn load_image(path: &Path, crop: Option<&CropRect>) -> DatasetResult<image::RgbImage> {
    let img = image::open(path)
        .map_err(|e| DatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    match crop {
        Some(crop) => crop_image(&img, crop),
        None => Ok(img),
    }
}

/// Labeled ECG images discovered under a dataset root.
#[derive(Debug, Clone)]
pub struct EcgDataset {
    root: PathBuf,
    samples: Vec<SampleIndex>,
    crop: Option<CropRect>,
}

impl EcgDataset {
    pub fn from_root(root: impl AsRef<Path>, crop: Option<CropRect>) -> DatasetResult<Self> {
        if let Some(crop) = &crop {
            crop.validate()?;
        }
        let root = root.as_ref().to_path_buf();
        let samples = index_classes(&root)?;
        tracing::info!(
            root = %root.display(),
            samples = samples.len(),
            "loaded ECG dataset index"
        );
        Ok(Self {
            root,
            samples,
            crop,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn crop(&self) -> Option<&CropRect> {
        self.crop.as_ref()
    }

    pub fn samples(&self) -> &[SampleIndex] {
        &self.samples
    }

    pub fn classes(&self) -> &'static [EcgClass] {
        &EcgClass::ALL
    }

    pub fn labels(&self) -> Vec<EcgClass> {
        self.samples.iter().map(|s| s.class).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn sample(&self, index: usize) -> DatasetResult<&SampleIndex> {
        self.samples.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.samples.len(),
        })
    }

    pub fn path(&self, index: usize) -> DatasetResult<&Path> {
        Ok(&self.sample(index)?.path)
    }
}

impl LabeledImages for EcgDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn load(&self, index: usize) -> DatasetResult<LabeledImage> {
        let sample = self.sample(index)?;
        let image = load_image(&sample.path, self.crop.as_ref())?;
        Ok(LabeledImage {
            image,
            label: sample.class,
        })
    }

    fn label(&self, index: usize) -> DatasetResult<EcgClass> {
        Ok(self.sample(index)?.class)
    }
}

/// A view over a shared source restricted to a list of indices.
#[derive(Debug, Clone)]
pub struct Subset<D> {
    source: Arc<D>,
    indices: Vec<usize>,
}

impl<D: LabeledImages> Subset<D> {
    pub fn new(source: Arc<D>, indices: Vec<usize>) -> Self {
        Self { source, indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn source(&self) -> &Arc<D> {
        &self.source
    }

    fn resolve(&self, index: usize) -> DatasetResult<usize> {
        self.indices
            .get(index)
            .copied()
            .ok_or(DatasetError::OutOfRange {
                index,
                len: self.indices.len(),
            })
    }
}

impl<D: LabeledImages> LabeledImages for Subset<D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn load(&self, index: usize) -> DatasetResult<LabeledImage> {
        self.source.load(self.resolve(index)?)
    }

    fn label(&self, index: usize) -> DatasetResult<EcgClass> {
        self.source.label(self.resolve(index)?)
    }
}

/// Applies an optional transform on top of another labeled-image source.
#[derive(Debug, Clone)]
pub struct DatasetWithTransform<D> {
    dataset: D,
    transform: Option<TransformPipeline>,
}

impl<D: LabeledImages> DatasetWithTransform<D> {
    pub fn new(dataset: D, transform: Option<TransformPipeline>) -> Self {
        Self { dataset, transform }
    }

    pub fn inner(&self) -> &D {
        &self.dataset
    }

    pub fn transform(&self) -> Option<&TransformPipeline> {
        self.transform.as_ref()
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn label(&self, index: usize) -> DatasetResult<EcgClass> {
        self.dataset.label(index)
    }

    /// Load the inner item and run it through the transform.
    /// Without a transform the image keeps its size and is scaled to `[0, 1]`.
    pub fn load(&self, index: usize) -> DatasetResult<EcgSample> {
        let item = self.dataset.load(index)?;
        match &self.transform {
            Some(pipeline) => pipeline.apply(item.image, item.label, index as u64),
            None => Ok(crate::aug::to_chw_sample(&item.image, item.label, index, None)),
        }
    }
}

#[cfg(feature = "burn-runtime")]
mod burn_dataset_impls {
    use super::*;
    use burn::data::dataset::Dataset;

    impl Dataset<LabeledImage> for EcgDataset {
        fn get(&self, index: usize) -> Option<LabeledImage> {
            LabeledImages::load(self, index)
                .map_err(|e| tracing::warn!(index, "failed to load ECG image: {e}"))
                .ok()
        }

        fn len(&self) -> usize {
            self.samples.len()
        }
    }

    impl<D: LabeledImages> Dataset<EcgSample> for DatasetWithTransform<D> {
        fn get(&self, index: usize) -> Option<EcgSample> {
            self.load(index)
                .map_err(|e| tracing::warn!(index, "failed to load ECG sample: {e}"))
                .ok()
        }

        fn len(&self) -> usize {
            self.dataset.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> image::RgbImage {
        image::RgbImage::from_fn(w, h, |x, y| image::Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn crop_inside_keeps_pixels() {
        let img = gradient(10, 8);
        let crop = CropRect::new(2, 1, 6, 5).unwrap();
        let out = crop_image(&img, &crop).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0, [2, 1, 7]);
        assert_eq!(out.get_pixel(3, 3).0, [5, 4, 7]);
    }

    #[test]
    fn crop_outside_pads_black() {
        let img = gradient(4, 4);
        let crop = CropRect::new(-2, 0, 3, 6).unwrap();
        let out = crop_image(&img, &crop).unwrap();
        assert_eq!(out.dimensions(), (5, 6));
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(2, 1).0, [0, 1, 7]);
        assert_eq!(out.get_pixel(4, 5).0, [0, 0, 0]);
    }

    #[test]
    fn inverted_crop_is_rejected() {
        assert!(matches!(
            CropRect::new(5, 0, 2, 4),
            Err(DatasetError::InvalidCrop { .. })
        ));
        assert!(CropRect::new(0, 4, 2, 4).is_err());
    }

    #[test]
    fn extreme_crop_coordinates_are_rejected_not_overflowed() {
        let crop = CropRect {
            left: i64::MIN,
            upper: 0,
            right: i64::MAX,
            lower: 1,
        };
        assert_eq!(crop.width(), u64::MAX);
        assert!(matches!(
            CropRect::new(i64::MIN, 0, i64::MAX, 1),
            Err(DatasetError::InvalidCrop { .. })
        ));
        assert!(matches!(
            CropRect::new(0, i64::MIN, 1, i64::MAX),
            Err(DatasetError::InvalidCrop { .. })
        ));
    }

    #[test]
    fn crop_far_outside_is_all_black() {
        let img = gradient(4, 4);
        let crop = CropRect::new(i64::MIN, i64::MIN, i64::MIN + 3, i64::MIN + 2).unwrap();
        let out = crop_image(&img, &crop).unwrap();
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
