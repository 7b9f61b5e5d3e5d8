use ecg_dataset::{DatasetError, EcgClass, TransformConfig, ValidationOutcome};
use ecg_models::ResNetKind;
use ecg_training::util::{fit, run_eval, run_predict, run_summary, EvalSplit};
use ecg_training::{EcgClassifierConfig, EvalArgs, PredictArgs, SummaryArgs, TrainConfig};
use std::path::Path;

fn write_dataset(root: &Path, per_class: usize) {
    for (c, class) in EcgClass::ALL.iter().enumerate() {
        let dir = root.join(class.dir_name());
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let shade = (c as u8) * 60 + (i as u8) * 3;
            let img = image::RgbImage::from_pixel(40, 36, image::Rgb([shade, 255 - shade, 128]));
            img.save(dir.join(format!("{i:03}.jpg"))).unwrap();
        }
    }
}

fn tiny_config(root: &Path, work: &Path) -> TrainConfig {
    TrainConfig {
        dataset_root: root.to_path_buf(),
        epochs: 1,
        batch_size: 4,
        seed: Some(7),
        transform: TransformConfig {
            target_size: Some((32, 32)),
            color_jitter_prob: 0.5,
            ..TransformConfig::default()
        },
        model: EcgClassifierConfig {
            arch: ResNetKind::ResNet18,
            base_width: 4,
            learning_rate: 1e-3,
            ..Default::default()
        },
        checkpoint_dir: work.join("checkpoints"),
        metrics_path: work.join("logs/metrics.jsonl"),
        ..Default::default()
    }
}

#[test]
fn one_epoch_writes_checkpoints_and_metrics() {
    let data = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_dataset(data.path(), 6);
    let cfg = tiny_config(data.path(), work.path());

    let report = fit(&cfg).unwrap();
    assert_eq!(report.train.len(), 1);
    assert_eq!(report.val.len(), 1);
    assert!(report.best_checkpoint.as_ref().unwrap().exists());
    assert!(report.last_checkpoint.exists());
    let test = report.test.unwrap();
    assert!(test.samples > 0);
    assert!((0.0..=1.0).contains(&test.accuracy));

    let lines = std::fs::read_to_string(&cfg.metrics_path).unwrap();
    let records: Vec<serde_json::Value> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    for name in ["train/loss", "val/accuracy", "val/f1score", "test/specificity"] {
        assert!(
            records.iter().any(|r| r["name"] == name),
            "missing {name} in metrics file"
        );
    }

    // Reload the checkpoint for evaluation and prediction.
    let cfg_path = work.path().join("ecg-train.toml");
    std::fs::write(&cfg_path, toml::to_string(&cfg).unwrap()).unwrap();

    let summary = run_eval(EvalArgs {
        config: Some(cfg_path.clone()),
        checkpoint: Some(report.last_checkpoint.clone()),
        split: EvalSplit::All,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(summary.samples, 24);

    let output = work.path().join("predictions.jsonl");
    let predictions = run_predict(PredictArgs {
        inputs: vec![data.path().join(EcgClass::Hb.dir_name())],
        config: Some(cfg_path),
        checkpoint: Some(report.last_checkpoint.clone()),
        output: Some(output.clone()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(predictions.len(), 6);
    assert!(predictions.iter().all(|p| p.label.is_none()));
    assert_eq!(std::fs::read_to_string(output).unwrap().lines().count(), 6);
}

#[test]
fn summary_flags_missing_class_directory() {
    let data = tempfile::tempdir().unwrap();
    write_dataset(data.path(), 2);
    std::fs::remove_dir_all(data.path().join(EcgClass::Pmi.dir_name())).unwrap();

    let report = run_summary(SummaryArgs {
        dataset_root: Some(data.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    assert_eq!(report.summary.total, 6);
}

#[test]
fn eval_without_checkpoint_fails() {
    let data = tempfile::tempdir().unwrap();
    write_dataset(data.path(), 1);
    let work = tempfile::tempdir().unwrap();
    let cfg = tiny_config(data.path(), work.path());
    let cfg_path = work.path().join("ecg-train.toml");
    std::fs::write(&cfg_path, toml::to_string(&cfg).unwrap()).unwrap();

    let err = run_eval(EvalArgs {
        config: Some(cfg_path),
        ..Default::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("failed to load checkpoint"));
}

#[test]
fn without_val_split_predict_uses_last_checkpoint() {
    let data = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_dataset(data.path(), 3);
    let cfg = TrainConfig {
        val_ratio: 0.0,
        test_ratio: 0.0,
        ..tiny_config(data.path(), work.path())
    };

    let report = fit(&cfg).unwrap();
    assert!(report.val.is_empty());
    assert!(report.best_checkpoint.is_none());
    assert!(!cfg.best_checkpoint().exists());

    let cfg_path = work.path().join("ecg-train.toml");
    std::fs::write(&cfg_path, toml::to_string(&cfg).unwrap()).unwrap();
    let predictions = run_predict(PredictArgs {
        config: Some(cfg_path),
        output: Some(work.path().join("predictions.jsonl")),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(predictions.len(), 12);
    assert!(predictions.iter().all(|p| p.label.is_some()));
}

#[test]
fn empty_dataset_is_reported() {
    let data = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_dataset(data.path(), 0);
    let cfg = tiny_config(data.path(), work.path());

    let err = fit(&cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::EmptyDataset(_))
    ));
}
