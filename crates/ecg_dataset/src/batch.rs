//! Batch iteration for training, validation, and testing.

use crate::source::{DatasetWithTransform, LabeledImages};
use crate::types::{DatasetError, DatasetResult};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    /// Shuffle sample order before iteration.
    pub shuffle: bool,
    /// Seed for reproducible shuffling; mixed with `epoch`.
    pub seed: Option<u64>,
    /// Epoch number, so a seeded shuffle differs between epochs.
    pub epoch: u64,
    /// Drop the last partial batch.
    pub drop_last: bool,
}

#[derive(Debug, Clone)]
pub struct EcgBatch<B: Backend> {
    /// Images in NCHW layout.
    pub images: Tensor<B, 4>,
    /// Class ids, shape [N].
    pub labels: Tensor<B, 1, Int>,
    /// Positions of the samples in the iterated dataset.
    pub indices: Vec<usize>,
}

impl<B: Backend> EcgBatch<B> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub struct BatchIter<'a, D> {
    dataset: &'a DatasetWithTransform<D>,
    order: Vec<usize>,
    cursor: usize,
    cfg: BatchConfig,
    processed_samples: usize,
    processed_batches: usize,
    skipped_errors: usize,
    started: Instant,
    total_load_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    permissive_errors: bool,
    images_buf: Vec<f32>,
    labels_buf: Vec<i64>,
}

impl<'a, D: LabeledImages> BatchIter<'a, D> {
    pub fn new(dataset: &'a DatasetWithTransform<D>, cfg: BatchConfig) -> Self {
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if cfg.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(cfg.epoch)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let log_every_samples = match std::env::var("ECG_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let permissive_errors = std::env::var("ECG_DATASET_PERMISSIVE")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .map(|v| v == "0" || v == "false" || v == "off")
            .map(|strict| !strict)
            .unwrap_or(true);
        let now = Instant::now();
        Self {
            dataset,
            order,
            cursor: 0,
            cfg,
            processed_samples: 0,
            processed_batches: 0,
            skipped_errors: 0,
            started: now,
            total_load_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
            permissive_errors,
            images_buf: Vec::new(),
            labels_buf: Vec::new(),
        }
    }

    /// Fail on the first unreadable sample instead of skipping it.
    pub fn strict(mut self) -> Self {
        self.permissive_errors = false;
        self
    }

    pub fn skipped_errors(&self) -> usize {
        self.skipped_errors
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<EcgBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.cursor >= self.order.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.order.len());
            if self.cfg.drop_last && end - self.cursor < batch_size {
                self.cursor = self.order.len();
                return Ok(None);
            }
            let slice = &self.order[self.cursor..end];
            self.cursor = end;

            self.images_buf.clear();
            self.labels_buf.clear();
            let mut indices = Vec::with_capacity(slice.len());
            let mut expected_size: Option<(u32, u32)> = None;

            let t_load = Instant::now();
            let dataset = self.dataset;
            let loaded: Vec<_> = slice
                .par_iter()
                .map(|&idx| (idx, dataset.load(idx)))
                .collect();
            self.total_load_time += t_load.elapsed();

            for (idx, res) in loaded {
                let sample = match res {
                    Ok(s) => s,
                    Err(e) if self.permissive_errors => {
                        tracing::warn!(index = idx, "skipping sample: {e}");
                        self.skipped_errors += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let size = (sample.width, sample.height);
                match expected_size {
                    None => expected_size = Some(size),
                    Some(sz) if sz != size => {
                        return Err(DatasetError::Other(format!(
                            "batch contains varying image sizes ({}x{} vs {}x{}); set a target_size to force consistency",
                            sz.0, sz.1, size.0, size.1
                        )));
                    }
                    _ => {}
                }

                self.images_buf.extend_from_slice(&sample.image_chw);
                self.labels_buf.push(sample.label.label() as i64);
                indices.push(idx);
            }

            // Every sample in this chunk failed to load; move on to the next chunk.
            let Some((width, height)) = expected_size else {
                continue;
            };

            let batch_len = indices.len();
            let images = Tensor::<B, 4>::from_data(
                TensorData::new(
                    self.images_buf.clone(),
                    [batch_len, 3, height as usize, width as usize],
                ),
                device,
            );
            let labels = Tensor::<B, 1, Int>::from_data(
                TensorData::new(self.labels_buf.clone(), [batch_len]),
                device,
            );

            self.processed_samples += batch_len;
            self.processed_batches += 1;
            self.maybe_log_progress();

            return Ok(Some(EcgBatch {
                images,
                labels,
                indices,
            }));
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let since_last = self.last_log.elapsed();
        if processed_since < threshold && since_last < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms = if self.processed_batches > 0 {
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        tracing::info!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            skipped_errors = self.skipped_errors,
            elapsed_s = format_args!("{secs:.1}"),
            rate = format_args!("{:.1} img/s", self.processed_samples as f32 / secs),
            avg_load_ms = format_args!("{avg_load_ms:.2}"),
            "dataset progress"
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}
