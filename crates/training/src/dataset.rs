use crate::config::TrainConfig;
use ecg_dataset::{
    class_counts, split_indices, DatasetError, DatasetWithTransform, EcgDataset, SplitIndices,
    Subset, TransformPipeline,
};
use std::sync::Arc;

pub type SplitDataset = DatasetWithTransform<Subset<EcgDataset>>;

/// Train/val/test views over one discovered dataset.
pub struct EcgDataModule {
    pub dataset: Arc<EcgDataset>,
    pub split: SplitIndices,
    pub train: SplitDataset,
    pub val: SplitDataset,
    pub test: SplitDataset,
}

/// Pipeline for evaluation: same geometry and normalization as training, no augmentation.
pub fn eval_pipeline(cfg: &TrainConfig) -> TransformPipeline {
    TransformPipeline::from_config(&cfg.transform.without_augmentation())
}

pub fn train_pipeline(cfg: &TrainConfig) -> TransformPipeline {
    let mut transform = cfg.transform.clone();
    if transform.seed.is_none() {
        transform.seed = cfg.seed;
    }
    TransformPipeline::from_config(&transform)
}

impl EcgDataModule {
    pub fn setup(cfg: &TrainConfig) -> anyhow::Result<Self> {
        let dataset = EcgDataset::from_root(&cfg.dataset_root, cfg.crop).map_err(|e| {
            anyhow::anyhow!(
                "failed to index dataset at {}: {e}",
                cfg.dataset_root.display()
            )
        })?;
        if dataset.is_empty() {
            return Err(DatasetError::EmptyDataset(cfg.dataset_root.clone()).into());
        }
        let labels = dataset.labels();
        let counts = class_counts(&labels);
        tracing::info!(?counts, total = labels.len(), "class distribution");

        let split = split_indices(&labels, cfg.val_ratio, cfg.test_ratio, cfg.split_seed)?;
        tracing::info!(
            train = split.train.len(),
            val = split.val.len(),
            test = split.test.len(),
            "dataset split"
        );

        let train_pipeline = train_pipeline(cfg);
        let eval_pipeline = eval_pipeline(cfg);
        tracing::debug!(train = %train_pipeline.describe(), eval = %eval_pipeline.describe(), "transforms");

        let dataset = Arc::new(dataset);
        let train = DatasetWithTransform::new(
            Subset::new(dataset.clone(), split.train.clone()),
            Some(train_pipeline),
        );
        let val = DatasetWithTransform::new(
            Subset::new(dataset.clone(), split.val.clone()),
            Some(eval_pipeline.clone()),
        );
        let test = DatasetWithTransform::new(
            Subset::new(dataset.clone(), split.test.clone()),
            Some(eval_pipeline),
        );
        Ok(Self {
            dataset,
            split,
            train,
            val,
            test,
        })
    }
}
