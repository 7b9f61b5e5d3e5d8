//! Confusion-matrix based multiclass metrics.
//!
//! Accuracy is micro-averaged (correct / total). Precision, recall, F1 and specificity are
//! macro-averaged over classes; a class that never appears in either predictions or targets
//! is left out of the average, and a zero denominator scores 0.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Train,
    Val,
    Test,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Train, Stage::Val, Stage::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Val => "val",
            Stage::Test => "test",
        }
    }

    /// Whether epoch metrics of this stage belong on the progress log.
    pub fn prog_bar(self) -> bool {
        self == Stage::Val
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Accuracy,
    Precision,
    Recall,
    F1Score,
    Specificity,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Accuracy,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::F1Score,
        MetricKind::Specificity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::Precision => "precision",
            MetricKind::Recall => "recall",
            MetricKind::F1Score => "f1score",
            MetricKind::Specificity => "specificity",
        }
    }
}

/// Row = target class, column = predicted class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Record predictions against targets. Pairs with an out-of-range class id are ignored.
    pub fn update(&mut self, preds: &[usize], targets: &[usize]) {
        for (&p, &t) in preds.iter().zip(targets) {
            if p < self.num_classes && t < self.num_classes {
                self.counts[t * self.num_classes + p] += 1;
            }
        }
    }

    pub fn get(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.num_classes + pred]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// (tp, fp, fn, tn) for one class, one-vs-rest.
    pub fn class_counts(&self, class: usize) -> (u64, u64, u64, u64) {
        let tp = self.get(class, class);
        let predicted: u64 = (0..self.num_classes).map(|t| self.get(t, class)).sum();
        let actual: u64 = (0..self.num_classes).map(|p| self.get(class, p)).sum();
        let fp = predicted - tp;
        let fn_ = actual - tp;
        let tn = self.total() - tp - fp - fn_;
        (tp, fp, fn_, tn)
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.get(c, c)).sum();
        correct as f64 / total as f64
    }

    fn macro_average(&self, score: impl Fn(u64, u64, u64, u64) -> f64) -> f64 {
        let mut sum = 0.0;
        let mut counted = 0usize;
        for class in 0..self.num_classes {
            let (tp, fp, fn_, tn) = self.class_counts(class);
            if tp + fp + fn_ == 0 {
                continue;
            }
            sum += score(tp, fp, fn_, tn);
            counted += 1;
        }
        if counted == 0 {
            0.0
        } else {
            sum / counted as f64
        }
    }

    pub fn precision(&self) -> f64 {
        self.macro_average(|tp, fp, _, _| safe_div(tp, tp + fp))
    }

    pub fn recall(&self) -> f64 {
        self.macro_average(|tp, _, fn_, _| safe_div(tp, tp + fn_))
    }

    pub fn f1(&self) -> f64 {
        self.macro_average(|tp, fp, fn_, _| safe_div(2 * tp, 2 * tp + fp + fn_))
    }

    pub fn specificity(&self) -> f64 {
        self.macro_average(|_, fp, _, tn| safe_div(tn, tn + fp))
    }

    pub fn compute(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Accuracy => self.accuracy(),
            MetricKind::Precision => self.precision(),
            MetricKind::Recall => self.recall(),
            MetricKind::F1Score => self.f1(),
            MetricKind::Specificity => self.specificity(),
        }
    }
}

fn safe_div(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub loss: Option<f64>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1score: f64,
    pub specificity: f64,
    pub samples: u64,
}

impl MetricSummary {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Accuracy => self.accuracy,
            MetricKind::Precision => self.precision,
            MetricKind::Recall => self.recall,
            MetricKind::F1Score => self.f1score,
            MetricKind::Specificity => self.specificity,
        }
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loss) = self.loss {
            write!(f, "loss={loss:.4} ")?;
        }
        write!(
            f,
            "accuracy={:.4} precision={:.4} recall={:.4} f1score={:.4} specificity={:.4} (n={})",
            self.accuracy, self.precision, self.recall, self.f1score, self.specificity, self.samples
        )
    }
}

/// Per-stage accumulator: confusion matrix plus batch-size weighted loss.
#[derive(Debug, Clone)]
pub struct ClassificationMetrics {
    confusion: ConfusionMatrix,
    loss_sum: f64,
    loss_samples: u64,
}

impl ClassificationMetrics {
    pub fn new(num_classes: usize) -> Self {
        Self {
            confusion: ConfusionMatrix::new(num_classes),
            loss_sum: 0.0,
            loss_samples: 0,
        }
    }

    pub fn update(&mut self, preds: &[usize], targets: &[usize]) {
        self.confusion.update(preds, targets);
    }

    pub fn update_loss(&mut self, loss: f64, batch_size: usize) {
        self.loss_sum += loss * batch_size as f64;
        self.loss_samples += batch_size as u64;
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    pub fn mean_loss(&self) -> Option<f64> {
        (self.loss_samples > 0).then(|| self.loss_sum / self.loss_samples as f64)
    }

    pub fn compute(&self) -> MetricSummary {
        MetricSummary {
            loss: self.mean_loss(),
            accuracy: self.confusion.accuracy(),
            precision: self.confusion.precision(),
            recall: self.confusion.recall(),
            f1score: self.confusion.f1(),
            specificity: self.confusion.specificity(),
            samples: self.confusion.total(),
        }
    }

    pub fn reset(&mut self) {
        self.confusion.reset();
        self.loss_sum = 0.0;
        self.loss_samples = 0;
    }
}
