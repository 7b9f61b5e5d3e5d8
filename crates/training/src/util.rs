use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use clap::{Parser, ValueEnum};
use ecg_dataset::{
    list_class_images, load_image, summarize_root_with_thresholds, BatchConfig, BatchIter,
    CropRect, DatasetError, DatasetWithTransform, EcgClass, EcgDataset, LabeledImages, ValidationOutcome,
    ValidationReport, ValidationThresholds,
};
use ecg_models::ResNetKind;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::dataset::{eval_pipeline, EcgDataModule};
use crate::{
    ClassifierTask, EcgClassifier, EcgClassifierConfig, MetricSummary, MetricsLogger, Stage,
    TrainBackend, TrainConfig,
};

type ADBackend = Autodiff<TrainBackend>;

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ecg_training=info,ecg_dataset=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum BackendKind {
    #[default]
    NdArray,
    Wgpu,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ArchKind {
    Resnet18,
    Resnet34,
}

impl From<ArchKind> for ResNetKind {
    fn from(kind: ArchKind) -> Self {
        match kind {
            ArchKind::Resnet18 => ResNetKind::ResNet18,
            ArchKind::Resnet34 => ResNetKind::ResNet34,
        }
    }
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}

/// Parse `left,upper,right,lower` in pixels.
pub fn parse_crop(raw: &str) -> Result<CropRect, String> {
    let parts: Vec<i64> = raw
        .split(',')
        .map(|p| p.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid crop '{raw}': {e}"))?;
    let &[left, upper, right, lower] = parts.as_slice() else {
        return Err(format!(
            "invalid crop '{raw}': expected left,upper,right,lower"
        ));
    };
    CropRect::new(left, upper, right, lower).map_err(|e| e.to_string())
}

pub fn save_checkpoint<B: Backend>(model: &EcgClassifier<B>, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))
}

/// Rebuild the classifier described by `cfg` and load trained weights into it.
/// The pretrained backbone record is not consulted.
pub fn load_classifier_from_checkpoint<B: Backend>(
    cfg: &EcgClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<EcgClassifier<B>, RecorderError> {
    if !path.exists() {
        return Err(RecorderError::FileNotFound(path.display().to_string()));
    }
    let cfg = EcgClassifierConfig {
        pretrained: None,
        ..cfg.clone()
    };
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    EcgClassifier::<B>::new(&cfg, device).load_file(path, &recorder, device)
}

/// Run one validation or test pass over `data` and close the stage.
#[allow(clippy::too_many_arguments)]
pub fn evaluate<B: Backend, D: LabeledImages>(
    model: &EcgClassifier<B>,
    task: &mut ClassifierTask,
    data: &DatasetWithTransform<D>,
    stage: Stage,
    epoch: usize,
    batch_size: usize,
    device: &B::Device,
    logger: &mut MetricsLogger,
) -> anyhow::Result<MetricSummary> {
    let mut iter = BatchIter::new(data, BatchConfig::default());
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        match stage {
            Stage::Val => task.validation_step(model, batch),
            Stage::Test => task.test_step(model, batch),
            Stage::Train => anyhow::bail!("training batches need an autodiff model"),
        }
    }
    if iter.skipped_errors() > 0 {
        tracing::warn!(stage = %stage, skipped = iter.skipped_errors(), "samples skipped");
    }
    Ok(task.on_epoch_end(stage, epoch, logger))
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Fine-tune a ResNet classifier on ECG scan images (MI/PMI/HB/Normal)"
)]
pub struct TrainArgs {
    /// TOML config; falls back to $ECG_TRAIN_CONFIG, then ./ecg-train.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Dataset root holding the four ECG class directories.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    /// Crop box applied before transforms: left,upper,right,lower.
    #[arg(long, value_parser = parse_crop)]
    pub crop: Option<CropRect>,
    /// Square side images are resized to.
    #[arg(long)]
    pub image_size: Option<u32>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long, value_enum)]
    pub arch: Option<ArchKind>,
    /// Burn record of an ImageNet backbone (1000-class head).
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    #[arg(long)]
    pub val_ratio: Option<f32>,
    #[arg(long)]
    pub test_ratio: Option<f32>,
    /// Seed for shuffling and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// JSONL file receiving one line per logged metric.
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,
}

impl TrainArgs {
    /// Config file values with command-line overrides applied.
    pub fn resolve_config(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = TrainConfig::load(self.config.as_deref())?;
        if let Some(root) = &self.dataset_root {
            cfg.dataset_root = root.clone();
        }
        if let Some(crop) = self.crop {
            cfg.crop = Some(crop);
        }
        if let Some(size) = self.image_size {
            cfg.transform.target_size = Some((size, size));
        }
        if let Some(epochs) = self.epochs {
            cfg.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            cfg.batch_size = batch_size;
        }
        if let Some(lr) = self.lr {
            cfg.model.learning_rate = lr;
        }
        if let Some(arch) = self.arch {
            cfg.model.arch = arch.into();
        }
        if let Some(pretrained) = &self.pretrained {
            cfg.model.pretrained = Some(pretrained.clone());
        }
        if let Some(ratio) = self.val_ratio {
            cfg.val_ratio = ratio;
        }
        if let Some(ratio) = self.test_ratio {
            cfg.test_ratio = ratio;
        }
        if let Some(seed) = self.seed {
            cfg.seed = Some(seed);
        }
        if let Some(dir) = &self.checkpoint_dir {
            cfg.checkpoint_dir = dir.clone();
        }
        if let Some(path) = &self.metrics_path {
            cfg.metrics_path = path.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub train: Vec<MetricSummary>,
    pub val: Vec<MetricSummary>,
    pub test: Option<MetricSummary>,
    pub best_val_loss: Option<f64>,
    pub best_checkpoint: Option<PathBuf>,
    pub last_checkpoint: PathBuf,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainReport> {
    validate_backend_choice(args.backend)?;
    let cfg = args.resolve_config()?;
    fit(&cfg)
}

/// Train for `cfg.epochs`, validating after each epoch and testing once at the end.
/// The lowest `val/loss` epoch is kept as the best checkpoint; the final weights as the last.
pub fn fit(cfg: &TrainConfig) -> anyhow::Result<TrainReport> {
    cfg.validate()?;
    let data = EcgDataModule::setup(cfg)?;
    fs::create_dir_all(&cfg.checkpoint_dir)?;
    let mut logger = MetricsLogger::with_file(&cfg.metrics_path)?;

    let device = <ADBackend as Backend>::Device::default();
    let mut model = EcgClassifier::<ADBackend>::new(&cfg.model, &device);
    let mut task = ClassifierTask::new(cfg.model.num_classes, cfg.model.learning_rate);
    let mut optim = task.configure_optimizer().init();

    let batch_size = cfg.batch_size.max(1);
    let mut report = TrainReport::default();
    for epoch in 0..cfg.epochs {
        let mut iter = BatchIter::new(
            &data.train,
            BatchConfig {
                shuffle: true,
                seed: cfg.seed,
                epoch: epoch as u64,
                drop_last: false,
            },
        );
        while let Some(batch) = iter.next_batch::<ADBackend>(batch_size, &device)? {
            let loss = task.training_step(&model, batch);
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(task.learning_rate(), model, grads);
        }
        let train = task.on_epoch_end(Stage::Train, epoch, &mut logger);
        tracing::info!("epoch {epoch}: train {train}");
        report.train.push(train);

        if data.val.is_empty() {
            continue;
        }
        let valid_model = model.valid();
        let val = evaluate::<TrainBackend, _>(
            &valid_model,
            &mut task,
            &data.val,
            Stage::Val,
            epoch,
            batch_size,
            &device,
            &mut logger,
        )?;
        tracing::info!("epoch {epoch}: val {val}");
        if let Some(loss) = val.loss {
            if report.best_val_loss.map_or(true, |best| loss < best) {
                let path = cfg.best_checkpoint();
                save_checkpoint(&valid_model, &path)?;
                tracing::info!(epoch, loss, path = %path.display(), "new best checkpoint");
                report.best_val_loss = Some(loss);
                report.best_checkpoint = Some(path);
            }
        }
        report.val.push(val);
    }

    let last = cfg.last_checkpoint();
    let valid_model = model.valid();
    save_checkpoint(&valid_model, &last)?;
    tracing::info!(path = %last.display(), "saved last checkpoint");
    report.last_checkpoint = last;

    if !data.test.is_empty() {
        let test = evaluate::<TrainBackend, _>(
            &valid_model,
            &mut task,
            &data.test,
            Stage::Test,
            cfg.epochs.saturating_sub(1),
            batch_size,
            &device,
            &mut logger,
        )?;
        tracing::info!("test {test}");
        report.test = Some(test);
    }
    Ok(report)
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalSplit {
    /// Every image under the dataset root.
    #[default]
    All,
    /// The held-out test split reproduced from the config's split seed.
    Test,
}

#[derive(Parser, Debug, Default)]
#[command(name = "eval", about = "Evaluate a trained ECG classifier checkpoint")]
pub struct EvalArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Checkpoint to load; defaults to the best checkpoint, or the last one when no best exists.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = EvalSplit::All)]
    pub split: EvalSplit,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Append the test metrics to this JSONL file.
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<MetricSummary> {
    validate_backend_choice(args.backend)?;
    let mut cfg = TrainConfig::load(args.config.as_deref())?;
    if let Some(root) = &args.dataset_root {
        cfg.dataset_root = root.clone();
    }
    if let Some(batch_size) = args.batch_size {
        cfg.batch_size = batch_size;
    }
    cfg.validate()?;

    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| cfg.resolve_checkpoint());
    let device = <TrainBackend as Backend>::Device::default();
    let model = load_classifier_from_checkpoint::<TrainBackend>(&cfg.model, &checkpoint, &device)
        .map_err(|e| {
            anyhow::anyhow!("failed to load checkpoint {}: {e}", checkpoint.display())
        })?;
    let mut task = ClassifierTask::new(cfg.model.num_classes, cfg.model.learning_rate);
    let mut logger = match &args.metrics_path {
        Some(path) => MetricsLogger::with_file(path)?,
        None => MetricsLogger::in_memory(),
    };

    let summary = match args.split {
        EvalSplit::Test => {
            let data = EcgDataModule::setup(&cfg)?;
            evaluate(
                &model,
                &mut task,
                &data.test,
                Stage::Test,
                0,
                cfg.batch_size,
                &device,
                &mut logger,
            )?
        }
        EvalSplit::All => {
            let dataset = EcgDataset::from_root(&cfg.dataset_root, cfg.crop)?;
            if dataset.is_empty() {
                return Err(DatasetError::EmptyDataset(cfg.dataset_root.clone()).into());
            }
            let data = DatasetWithTransform::new(dataset, Some(eval_pipeline(&cfg)));
            evaluate(
                &model,
                &mut task,
                &data,
                Stage::Test,
                0,
                cfg.batch_size,
                &device,
                &mut logger,
            )?
        }
    };
    tracing::info!(checkpoint = %checkpoint.display(), split = ?args.split, "eval complete: {summary}");
    Ok(summary)
}

#[derive(Parser, Debug, Default)]
#[command(name = "predict", about = "Classify ECG scan images with a trained checkpoint")]
pub struct PredictArgs {
    /// Image files or directories of .jpg files; empty predicts the whole dataset root.
    pub inputs: Vec<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Write JSON lines here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub path: PathBuf,
    pub predicted: EcgClass,
    pub predicted_id: usize,
    /// Known class when the image came from a labeled class directory.
    pub label: Option<EcgClass>,
}

pub fn run_predict(args: PredictArgs) -> anyhow::Result<Vec<Prediction>> {
    validate_backend_choice(args.backend)?;
    let mut cfg = TrainConfig::load(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        cfg.batch_size = batch_size;
    }
    cfg.validate()?;

    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| cfg.resolve_checkpoint());
    let device = <TrainBackend as Backend>::Device::default();
    let model = load_classifier_from_checkpoint::<TrainBackend>(&cfg.model, &checkpoint, &device)
        .map_err(|e| {
            anyhow::anyhow!("failed to load checkpoint {}: {e}", checkpoint.display())
        })?;

    let predictions = if args.inputs.is_empty() {
        predict_dataset(&model, &cfg, &device)?
    } else {
        predict_files(&model, &cfg, &collect_inputs(&args.inputs)?, &device)?
    };

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Box::new(std::io::BufWriter::new(fs::File::create(path)?))
        }
        None => Box::new(std::io::stdout().lock()),
    };
    for prediction in &predictions {
        writeln!(out, "{}", serde_json::to_string(prediction)?)?;
    }
    out.flush()?;
    tracing::info!(count = predictions.len(), "predictions written");
    Ok(predictions)
}

fn predict_dataset(
    model: &EcgClassifier<TrainBackend>,
    cfg: &TrainConfig,
    device: &<TrainBackend as Backend>::Device,
) -> anyhow::Result<Vec<Prediction>> {
    let dataset = EcgDataset::from_root(&cfg.dataset_root, cfg.crop)?;
    let data = DatasetWithTransform::new(dataset, Some(eval_pipeline(cfg)));
    let task = ClassifierTask::new(cfg.model.num_classes, cfg.model.learning_rate);
    let mut iter = BatchIter::new(&data, BatchConfig::default());
    let mut predictions = Vec::with_capacity(data.len());
    while let Some(batch) = iter.next_batch::<TrainBackend>(cfg.batch_size, device)? {
        let indices = batch.indices.clone();
        let preds = class_ids(task.predict_step(model, batch));
        for (idx, pred) in indices.into_iter().zip(preds) {
            let predicted = EcgClass::from_label(pred)
                .ok_or_else(|| anyhow::anyhow!("model predicted unknown class id {pred}"))?;
            predictions.push(Prediction {
                path: data.inner().path(idx)?.to_path_buf(),
                predicted,
                predicted_id: pred,
                label: Some(data.label(idx)?),
            });
        }
    }
    Ok(predictions)
}

fn predict_files(
    model: &EcgClassifier<TrainBackend>,
    cfg: &TrainConfig,
    paths: &[PathBuf],
    device: &<TrainBackend as Backend>::Device,
) -> anyhow::Result<Vec<Prediction>> {
    let pipeline = eval_pipeline(cfg);
    let mut predictions = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(cfg.batch_size.max(1)) {
        let mut images = Vec::new();
        let mut size: Option<(u32, u32)> = None;
        for (i, path) in chunk.iter().enumerate() {
            let img = load_image(path, cfg.crop.as_ref())?;
            let (chw, width, height) = pipeline.apply_unlabeled(img, i as u64);
            match size {
                None => size = Some((width, height)),
                Some(s) if s != (width, height) => anyhow::bail!(
                    "{} is {width}x{height} but the batch is {}x{}; set transform.target_size",
                    path.display(),
                    s.0,
                    s.1
                ),
                _ => {}
            }
            images.extend(chw);
        }
        let Some((width, height)) = size else {
            continue;
        };
        let images = Tensor::<TrainBackend, 4>::from_data(
            TensorData::new(images, [chunk.len(), 3, height as usize, width as usize]),
            device,
        );
        for (path, pred) in chunk.iter().zip(class_ids(model.predict(images))) {
            let predicted = EcgClass::from_label(pred)
                .ok_or_else(|| anyhow::anyhow!("model predicted unknown class id {pred}"))?;
            predictions.push(Prediction {
                path: path.clone(),
                predicted,
                predicted_id: pred,
                label: None,
            });
        }
    }
    Ok(predictions)
}

/// Expand directories to their `.jpg` files; plain files pass through.
fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let (files, _) = list_class_images(input)?;
            out.extend(files);
        } else if input.is_file() {
            out.push(input.clone());
        } else {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    Ok(out)
}

fn class_ids<B: Backend>(preds: Tensor<B, 1, burn::tensor::Int>) -> Vec<usize> {
    preds
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.max(0) as usize)
        .collect()
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "summary",
    about = "Count images per class directory and check dataset balance"
)]
pub struct SummaryArgs {
    /// Dataset root; defaults to the configured one.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Fail when a class has fewer images (also $ECG_DATASET_MIN_PER_CLASS).
    #[arg(long)]
    pub min_per_class: Option<usize>,
    /// Fail when largest/smallest class exceeds this ratio (also $ECG_DATASET_MAX_IMBALANCE).
    #[arg(long)]
    pub max_imbalance: Option<f32>,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run_summary(args: SummaryArgs) -> anyhow::Result<ValidationReport> {
    let root = match &args.dataset_root {
        Some(root) => root.clone(),
        None => TrainConfig::load(args.config.as_deref())?.dataset_root,
    };
    let mut thresholds = ValidationThresholds::from_env();
    if args.min_per_class.is_some() {
        thresholds.min_per_class = args.min_per_class;
    }
    if args.max_imbalance.is_some() {
        thresholds.max_imbalance_ratio = args.max_imbalance;
    }
    let report = summarize_root_with_thresholds(&root, &thresholds)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("dataset {}", report.summary.root.display());
        for class in &report.summary.classes {
            let status = if class.present { "" } else { " (missing)" };
            println!(
                "  {:<7} {:>6} images {:>4} skipped{status}",
                class.class.as_str(),
                class.images,
                class.skipped
            );
        }
        println!("  total   {:>6}", report.summary.total);
        println!("outcome: {}", report.outcome.as_str());
        for reason in &report.reasons {
            println!("  - {reason}");
        }
    }
    if report.outcome == ValidationOutcome::Fail {
        tracing::warn!(root = %root.display(), "dataset validation failed");
    }
    Ok(report)
}
