use burn::module::Module;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::{backend::Backend, Int, Tensor};
use ecg_dataset::EcgClass;
use ecg_models::{ResNet, ResNetConfig, ResNetKind, IMAGENET_CLASSES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcgClassifierConfig {
    pub num_classes: usize,
    pub learning_rate: f64,
    pub arch: ResNetKind,
    pub base_width: usize,
    /// ImageNet backbone record (1000-class head) to start from.
    pub pretrained: Option<PathBuf>,
}

impl Default for EcgClassifierConfig {
    fn default() -> Self {
        Self {
            num_classes: EcgClass::COUNT,
            learning_rate: 1e-4,
            arch: ResNetKind::ResNet34,
            base_width: 64,
            pretrained: None,
        }
    }
}

impl EcgClassifierConfig {
    fn backbone_config(&self, num_classes: usize) -> ResNetConfig {
        ResNetConfig {
            kind: self.arch,
            base_width: self.base_width,
            num_classes,
        }
    }
}

/// ResNet backbone whose head predicts the ECG classes.
#[derive(Debug, Module)]
pub struct EcgClassifier<B: Backend> {
    backbone: ResNet<B>,
    num_classes: usize,
}

impl<B: Backend> EcgClassifier<B> {
    /// Build the classifier, starting from pretrained backbone weights when configured.
    /// A configured record that is missing or unreadable falls back to random init with a warning.
    pub fn new(cfg: &EcgClassifierConfig, device: &B::Device) -> Self {
        let backbone = match cfg.pretrained.as_deref() {
            Some(path) => match load_backbone::<B>(cfg, path, device) {
                Ok(backbone) => {
                    tracing::info!(path = %path.display(), "loaded pretrained backbone");
                    backbone
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "failed to load pretrained backbone; using random init ({e})"
                    );
                    ResNet::new(&cfg.backbone_config(IMAGENET_CLASSES), device)
                }
            },
            None => ResNet::new(&cfg.backbone_config(IMAGENET_CLASSES), device),
        };
        Self {
            backbone: backbone.with_head(cfg.num_classes, device),
            num_classes: cfg.num_classes.max(1),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Logits for images in NCHW layout, shape [batch, num_classes].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.backbone.forward(images)
    }

    /// Argmax class ids, shape [batch].
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        argmax_classes(self.forward(images))
    }

    /// Mean cross-entropy of logits against class ids.
    pub fn loss(&self, logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let loss = CrossEntropyLossConfig::new().init(&logits.device());
        loss.forward(logits, labels)
    }
}

pub fn argmax_classes<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let batch = logits.dims()[0];
    logits.argmax(1).reshape([batch])
}

fn load_backbone<B: Backend>(
    cfg: &EcgClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<ResNet<B>, RecorderError> {
    if !path.exists() {
        return Err(RecorderError::FileNotFound(path.display().to_string()));
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    ResNet::<B>::new(&cfg.backbone_config(IMAGENET_CLASSES), device).load_file(path, &recorder, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> EcgClassifierConfig {
        EcgClassifierConfig {
            arch: ResNetKind::ResNet18,
            base_width: 4,
            ..Default::default()
        }
    }

    #[test]
    fn forward_has_one_logit_per_class() {
        let device = Default::default();
        let model = EcgClassifier::<TestBackend>::new(&tiny_config(), &device);
        let images = Tensor::<TestBackend, 4>::zeros([3, 3, 32, 32], &device);
        assert_eq!(model.forward(images.clone()).dims(), [3, 4]);
        assert_eq!(model.predict(images).dims(), [3]);
    }

    #[test]
    fn missing_pretrained_record_falls_back() {
        let device = Default::default();
        let cfg = EcgClassifierConfig {
            pretrained: Some(PathBuf::from("/nonexistent/resnet34.bin")),
            ..tiny_config()
        };
        let model = EcgClassifier::<TestBackend>::new(&cfg, &device);
        assert_eq!(model.num_classes(), 4);
    }

    #[test]
    fn argmax_picks_largest_logit() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1f32, 2.0, -1.0, 0.0, 3.0, 1.0, 0.5, 0.2], [2, 4]),
            &device,
        );
        let preds = argmax_classes(logits)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(preds, vec![1, 0]);
    }

    #[test]
    fn cross_entropy_is_low_for_confident_correct_logits() {
        let device = Default::default();
        let model = EcgClassifier::<TestBackend>::new(&tiny_config(), &device);
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![10.0f32, 0.0, 0.0, 0.0], [1, 4]),
            &device,
        );
        let labels =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64], [1]), &device);
        let loss: f32 = model.loss(logits, labels).into_scalar();
        assert!(loss < 1e-3);
    }
}
