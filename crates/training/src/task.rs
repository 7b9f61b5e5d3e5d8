//! Train/val/test/predict steps around `EcgClassifier` with per-stage metric state.

use crate::classifier::{argmax_classes, EcgClassifier};
use crate::logger::MetricsLogger;
use crate::metrics::{ClassificationMetrics, MetricSummary, Stage};
use burn::optim::AdamConfig;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};
use ecg_dataset::EcgBatch;

/// Step bookkeeping for one classifier. Train, val and test keep separate metric state so
/// interleaved stages never mix their counts.
#[derive(Debug, Clone)]
pub struct ClassifierTask {
    num_classes: usize,
    learning_rate: f64,
    train_metrics: ClassificationMetrics,
    val_metrics: ClassificationMetrics,
    test_metrics: ClassificationMetrics,
}

impl ClassifierTask {
    pub fn new(num_classes: usize, learning_rate: f64) -> Self {
        Self {
            num_classes,
            learning_rate,
            train_metrics: ClassificationMetrics::new(num_classes),
            val_metrics: ClassificationMetrics::new(num_classes),
            test_metrics: ClassificationMetrics::new(num_classes),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn metrics(&self, stage: Stage) -> &ClassificationMetrics {
        match stage {
            Stage::Train => &self.train_metrics,
            Stage::Val => &self.val_metrics,
            Stage::Test => &self.test_metrics,
        }
    }

    fn metrics_mut(&mut self, stage: Stage) -> &mut ClassificationMetrics {
        match stage {
            Stage::Train => &mut self.train_metrics,
            Stage::Val => &mut self.val_metrics,
            Stage::Test => &mut self.test_metrics,
        }
    }

    /// Forward, loss, argmax, and metric update shared by every stage. Returns the loss.
    pub fn common_step<B: Backend>(
        &mut self,
        model: &EcgClassifier<B>,
        batch: EcgBatch<B>,
        stage: Stage,
    ) -> Tensor<B, 1> {
        let batch_size = batch.len();
        let logits = model.forward(batch.images);
        let loss = model.loss(logits.clone(), batch.labels.clone());

        let preds = int_values(argmax_classes(logits));
        let targets = int_values(batch.labels);
        let loss_value = scalar_value(loss.clone());

        let metrics = self.metrics_mut(stage);
        metrics.update(&preds, &targets);
        metrics.update_loss(loss_value, batch_size);
        loss
    }

    /// Returns the loss to backpropagate.
    pub fn training_step<B: AutodiffBackend>(
        &mut self,
        model: &EcgClassifier<B>,
        batch: EcgBatch<B>,
    ) -> Tensor<B, 1> {
        self.common_step(model, batch, Stage::Train)
    }

    pub fn validation_step<B: Backend>(&mut self, model: &EcgClassifier<B>, batch: EcgBatch<B>) {
        self.common_step(model, batch, Stage::Val);
    }

    pub fn test_step<B: Backend>(&mut self, model: &EcgClassifier<B>, batch: EcgBatch<B>) {
        self.common_step(model, batch, Stage::Test);
    }

    /// Predicted class ids for a batch; labels are ignored and no metric state changes.
    pub fn predict_step<B: Backend>(
        &self,
        model: &EcgClassifier<B>,
        batch: EcgBatch<B>,
    ) -> Tensor<B, 1, Int> {
        model.predict(batch.images)
    }

    /// Adam over every parameter, stepped with `learning_rate()`.
    pub fn configure_optimizer(&self) -> AdamConfig {
        AdamConfig::new()
    }

    /// Compute the stage's epoch metrics, log them, and reset the stage.
    pub fn on_epoch_end(
        &mut self,
        stage: Stage,
        epoch: usize,
        logger: &mut MetricsLogger,
    ) -> MetricSummary {
        let metrics = self.metrics_mut(stage);
        let summary = metrics.compute();
        metrics.reset();
        logger.log_summary(epoch, stage, &summary);
        summary
    }
}

fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.max(0) as usize)
        .collect()
}

fn scalar_value<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor
        .detach()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::EcgClassifierConfig;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use ecg_models::ResNetKind;

    type TestBackend = NdArray<f32>;

    fn batch(labels: Vec<i64>) -> EcgBatch<TestBackend> {
        let device = Default::default();
        let n = labels.len();
        EcgBatch {
            images: Tensor::zeros([n, 3, 32, 32], &device),
            labels: Tensor::from_data(TensorData::new(labels, [n]), &device),
            indices: (0..n).collect(),
        }
    }

    #[test]
    fn stages_keep_separate_state() {
        let device = Default::default();
        let model = EcgClassifier::<TestBackend>::new(
            &EcgClassifierConfig {
                arch: ResNetKind::ResNet18,
                base_width: 4,
                ..Default::default()
            },
            &device,
        );
        let mut task = ClassifierTask::new(4, 1e-4);
        task.validation_step(&model, batch(vec![0, 1, 2]));
        task.test_step(&model, batch(vec![3]));

        assert_eq!(task.metrics(Stage::Val).confusion().total(), 3);
        assert_eq!(task.metrics(Stage::Test).confusion().total(), 1);
        assert_eq!(task.metrics(Stage::Train).confusion().total(), 0);

        let mut logger = MetricsLogger::in_memory();
        let summary = task.on_epoch_end(Stage::Val, 0, &mut logger);
        assert_eq!(summary.samples, 3);
        assert!(summary.loss.unwrap().is_finite());
        assert_eq!(task.metrics(Stage::Val).confusion().total(), 0);
        assert_eq!(task.metrics(Stage::Test).confusion().total(), 1);
        assert!(logger.last("val/f1score").is_some());
    }

    #[test]
    fn predict_step_does_not_touch_metrics() {
        let device = Default::default();
        let model = EcgClassifier::<TestBackend>::new(
            &EcgClassifierConfig {
                arch: ResNetKind::ResNet18,
                base_width: 4,
                ..Default::default()
            },
            &device,
        );
        let task = ClassifierTask::new(4, 1e-4);
        let preds = task.predict_step(&model, batch(vec![0, 0]));
        assert_eq!(preds.dims(), [2]);
        assert_eq!(task.metrics(Stage::Test).confusion().total(), 0);
    }
}
