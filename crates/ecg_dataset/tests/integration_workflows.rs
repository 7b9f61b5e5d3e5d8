//! End-to-end ecg_dataset workflows over a synthetic dataset root:
//! 1. Discovery → crop → transform
//! 2. Split → subset → batch iteration
//! 3. Summary → validation

use burn::backend::ndarray::NdArray;
use burn::data::dataset::Dataset;
use ecg_dataset::{
    split_indices, summarize_root_with_thresholds, BatchConfig, BatchIter, CropRect,
    DatasetError, DatasetWithTransform, EcgClass, EcgDataset, LabeledImages, ResizeMode, Subset,
    TransformPipelineBuilder, ValidationOutcome, ValidationThresholds,
};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use std::sync::Arc;

type TestBackend = NdArray<f32>;

/// Write `per_class` 16x12 jpgs into every class directory, plus files that must be ignored.
fn create_synthetic_root(root: &Path, per_class: usize) -> anyhow::Result<()> {
    for class in EcgClass::ALL {
        let dir = root.join(class.dir_name());
        fs::create_dir_all(&dir)?;
        for i in 0..per_class {
            let shade = (class.label() * 60) as u8;
            let img = RgbImage::from_pixel(16, 12, Rgb([shade, 128, 200]));
            img.save(dir.join(format!("scan_{i:03}.jpg")))?;
        }
        fs::write(dir.join("notes.txt"), b"not an image")?;
        RgbImage::new(4, 4).save(dir.join("extra.png"))?;
        // Valid jpeg data under an upper-case suffix; discovery is case-sensitive.
        fs::copy(dir.join("scan_000.jpg"), dir.join("upper.JPG"))?;
    }
    Ok(())
}

#[test]
fn discovery_pairs_jpgs_with_labels_in_class_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 3)?;

    let dataset = EcgDataset::from_root(tmp.path(), None)?;
    assert_eq!(dataset.len(), 12);
    let labels = dataset.labels();
    for (i, class) in EcgClass::ALL.iter().enumerate() {
        assert!(labels[i * 3..i * 3 + 3].iter().all(|l| l == class));
    }
    assert!(dataset
        .samples()
        .iter()
        .all(|s| s.path.extension().and_then(|e| e.to_str()) == Some("jpg")));
    assert!(!dataset.samples().iter().any(|s| s.path.ends_with("upper.JPG")));
    assert!(dataset.path(0)?.ends_with("scan_000.jpg"));

    let item = dataset.load(4)?;
    assert_eq!(item.label, EcgClass::Pmi);
    assert_eq!(item.image.dimensions(), (16, 12));
    Ok(())
}

#[test]
fn missing_class_directory_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 1)?;
    fs::remove_dir_all(tmp.path().join(EcgClass::Hb.dir_name()))?;

    let err = EcgDataset::from_root(tmp.path(), None).unwrap_err();
    assert!(matches!(
        err,
        DatasetError::MissingClassDir {
            class: EcgClass::Hb,
            ..
        }
    ));
    Ok(())
}

#[test]
fn crop_and_transform_shape_samples() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 2)?;

    let crop = CropRect::new(2, 2, 10, 8)?;
    let dataset = EcgDataset::from_root(tmp.path(), Some(crop))?;
    assert_eq!(dataset.load(0)?.image.dimensions(), (8, 6));

    let raw = DatasetWithTransform::new(dataset.clone(), None);
    let sample = raw.load(1)?;
    assert_eq!((sample.width, sample.height), (8, 6));
    assert_eq!(sample.image_chw.len(), 3 * 8 * 6);
    assert!(sample.image_chw.iter().all(|v| (0.0..=1.0).contains(v)));

    let pipeline = TransformPipelineBuilder::new()
        .target_size(Some((4, 4)))
        .resize_mode(ResizeMode::Force)
        .build();
    let transformed = DatasetWithTransform::new(dataset, Some(pipeline));
    assert_eq!(transformed.len(), 8);
    let sample = transformed.load(7)?;
    assert_eq!((sample.width, sample.height), (4, 4));
    assert_eq!(sample.label, EcgClass::Normal);

    assert!(Dataset::get(&transformed, 99).is_none());
    Ok(())
}

#[test]
fn split_subsets_batch_into_tensors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 5)?;

    let dataset = Arc::new(EcgDataset::from_root(tmp.path(), None)?);
    let split = split_indices(&dataset.labels(), 0.2, 0.2, 3)?;
    assert_eq!(split.train.len(), 12);
    assert_eq!(split.val.len(), 4);
    assert_eq!(split.test.len(), 4);

    let val = Subset::new(dataset.clone(), split.val.clone());
    for (i, source_idx) in split.val.iter().enumerate() {
        assert_eq!(val.label(i)?, dataset.labels()[*source_idx]);
    }

    let pipeline = TransformPipelineBuilder::new()
        .target_size(Some((8, 8)))
        .build();
    let train = DatasetWithTransform::new(
        Subset::new(dataset.clone(), split.train.clone()),
        Some(pipeline),
    );
    let device = Default::default();
    let mut iter = BatchIter::new(
        &train,
        BatchConfig {
            shuffle: true,
            seed: Some(1),
            epoch: 0,
            drop_last: true,
        },
    );
    let mut seen = Vec::new();
    while let Some(batch) = iter.next_batch::<TestBackend>(5, &device)? {
        assert_eq!(batch.images.dims(), [5, 3, 8, 8]);
        assert_eq!(batch.labels.dims(), [5]);
        let labels = batch.labels.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        for (label, idx) in labels.iter().zip(&batch.indices) {
            assert_eq!(*label as usize, train.label(*idx)?.label());
        }
        seen.extend(batch.indices);
    }
    // 12 samples, batches of 5, last partial batch dropped.
    assert_eq!(seen.len(), 10);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 10);
    Ok(())
}

#[test]
fn mixed_sizes_without_resize_fail_batching() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 1)?;
    RgbImage::new(5, 5).save(tmp.path().join(EcgClass::Mi.dir_name()).join("odd.jpg"))?;

    let dataset = EcgDataset::from_root(tmp.path(), None)?;
    let raw = DatasetWithTransform::new(dataset, None);
    let mut iter = BatchIter::new(&raw, BatchConfig::default()).strict();
    let device = Default::default();
    assert!(iter.next_batch::<TestBackend>(8, &device).is_err());
    Ok(())
}

#[test]
fn summary_reports_counts_and_skips() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 2)?;

    let report = summarize_root_with_thresholds(tmp.path(), &ValidationThresholds::default())?;
    assert_eq!(report.summary.total, 8);
    assert!(report.summary.classes.iter().all(|c| c.images == 2 && c.skipped == 3));
    assert_eq!(report.outcome, ValidationOutcome::Warn);

    fs::remove_dir_all(tmp.path().join(EcgClass::Normal.dir_name()))?;
    let report = summarize_root_with_thresholds(
        tmp.path(),
        &ValidationThresholds {
            min_per_class: Some(1),
            max_imbalance_ratio: None,
        },
    )?;
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    assert_eq!(report.summary.total, 6);
    Ok(())
}

#[test]
fn unreadable_jpg_is_skipped_unless_strict() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_root(tmp.path(), 2)?;
    fs::write(
        tmp.path().join(EcgClass::Hb.dir_name()).join("broken.jpg"),
        b"not a jpeg",
    )?;

    let dataset = EcgDataset::from_root(tmp.path(), None)?;
    assert_eq!(dataset.len(), 9);
    let pipeline = TransformPipelineBuilder::new()
        .target_size(Some((8, 8)))
        .build();
    let data = DatasetWithTransform::new(dataset, Some(pipeline));
    let device = Default::default();

    let mut iter = BatchIter::new(&data, BatchConfig::default());
    let mut loaded = 0;
    while let Some(batch) = iter.next_batch::<TestBackend>(4, &device)? {
        loaded += batch.len();
    }
    assert_eq!(loaded, 8);
    assert_eq!(iter.skipped_errors(), 1);
    assert_eq!(iter.processed_samples(), 8);

    let mut strict = BatchIter::new(&data, BatchConfig::default()).strict();
    let mut result = Ok(None);
    for _ in 0..3 {
        result = strict.next_batch::<TestBackend>(4, &device);
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(DatasetError::Image { .. })));
    Ok(())
}
