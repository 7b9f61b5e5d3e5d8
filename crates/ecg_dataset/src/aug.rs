//! Image resizing, augmentation, and normalization pipeline.

use crate::types::{DatasetResult, EcgClass, EcgSample, ResizeMode};
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Channel statistics of the ImageNet training set, expected by pretrained backbones.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Resize all images to this (width, height). If None, images must already share shape.
    pub target_size: Option<(u32, u32)>,
    /// How to resize images when target_size is set.
    pub resize_mode: ResizeMode,
    /// Probability of applying a horizontal flip augmentation.
    pub flip_horizontal_prob: f32,
    /// Probability of applying a light color jitter (brightness/contrast).
    pub color_jitter_prob: f32,
    /// Max jitter scale for brightness/contrast.
    pub color_jitter_strength: f32,
    /// Probability of adding uniform noise per channel.
    pub noise_prob: f32,
    /// Max absolute noise added (0-1 range).
    pub noise_strength: f32,
    /// Probability of applying a blur.
    pub blur_prob: f32,
    /// Blur sigma (passed to image::imageops::blur).
    pub blur_sigma: f32,
    /// Per-channel normalization applied after scaling to [0, 1]; None keeps [0, 1].
    pub normalize: Option<Normalize>,
    /// Seed for reproducible augmentation.
    pub seed: Option<u64>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            target_size: Some((224, 224)),
            resize_mode: ResizeMode::Force,
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.1,
            noise_prob: 0.0,
            noise_strength: 0.02,
            blur_prob: 0.0,
            blur_sigma: 1.0,
            normalize: Some(Normalize::default()),
            seed: None,
        }
    }
}

impl TransformConfig {
    /// Same geometry and normalization with every random augmentation disabled.
    pub fn without_augmentation(&self) -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            noise_prob: 0.0,
            blur_prob: 0.0,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_size: Option<(u32, u32)>,
    pub resize_mode: ResizeMode,
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub noise_prob: f32,
    pub noise_strength: f32,
    pub blur_prob: f32,
    pub blur_sigma: f32,
    pub normalize: Option<Normalize>,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &TransformConfig) -> Self {
        Self {
            target_size: cfg.target_size,
            resize_mode: cfg.resize_mode,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            color_jitter_prob: cfg.color_jitter_prob,
            color_jitter_strength: cfg.color_jitter_strength,
            noise_prob: cfg.noise_prob,
            noise_strength: cfg.noise_strength,
            blur_prob: cfg.blur_prob,
            blur_sigma: cfg.blur_sigma,
            normalize: cfg.normalize,
            seed: cfg.seed,
        }
    }

    pub fn describe(&self) -> String {
        let ts = self
            .target_size
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "none".to_string());
        let norm = self
            .normalize
            .map(|n| format!("mean={:?} std={:?}", n.mean, n.std))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "target_size={} resize={:?} flip_p={:.2} color_jitter_p={:.2} strength={:.2} noise_p={:.2} strength={:.3} blur_p={:.2} sigma={:.2} normalize=({}) seed={}",
            ts,
            self.resize_mode,
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.noise_prob,
            self.noise_strength,
            self.blur_prob,
            self.blur_sigma,
            norm,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Resize, augment, and normalize one image. `key` decorrelates seeded randomness per sample.
    pub fn apply(
        &self,
        img: image::RgbImage,
        label: EcgClass,
        key: u64,
    ) -> DatasetResult<EcgSample> {
        let img = self.transform_image(img, key);
        Ok(to_chw_sample(
            &img,
            label,
            key as usize,
            self.normalize.as_ref(),
        ))
    }

    /// Same as [`TransformPipeline::apply`] for an image without a label.
    /// Returns the CHW buffer with its width and height.
    pub fn apply_unlabeled(&self, img: image::RgbImage, key: u64) -> (Vec<f32>, u32, u32) {
        let img = self.transform_image(img, key);
        let (width, height) = img.dimensions();
        (to_chw(&img, self.normalize.as_ref()), width, height)
    }

    fn transform_image(&self, img: image::RgbImage, key: u64) -> image::RgbImage {
        // Seeded if provided (per-sample deterministic), else thread-local.
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ key);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let mut img = match self.target_size {
            Some((w, h)) => match self.resize_mode {
                ResizeMode::Force => image::imageops::resize(&img, w, h, FilterType::Triangle),
                ResizeMode::Letterbox => letterbox_resize(&img, w, h),
            },
            None => img,
        };

        maybe_hflip(&mut img, self.flip_horizontal_prob, rng);
        maybe_jitter(
            &mut img,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_noise(&mut img, self.noise_prob, self.noise_strength, rng);
        maybe_blur(&mut img, self.blur_prob, self.blur_sigma, rng);
        img
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::from_config(&TransformConfig::default()),
        }
    }
    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.inner.resize_mode = mode;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn noise(mut self, prob: f32, strength: f32) -> Self {
        self.inner.noise_prob = prob;
        self.inner.noise_strength = strength;
        self
    }
    pub fn blur(mut self, prob: f32, sigma: f32) -> Self {
        self.inner.blur_prob = prob;
        self.inner.blur_sigma = sigma;
        self
    }
    pub fn normalize(mut self, normalize: Option<Normalize>) -> Self {
        self.inner.normalize = normalize;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

/// Scale an RGB image to [0, 1] in CHW layout, then normalize if requested.
pub fn to_chw(img: &image::RgbImage, normalize: Option<&Normalize>) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            let mut v = pixel[c] as f32 / 255.0;
            if let Some(n) = normalize {
                v = (v - n.mean[c]) / n.std[c];
            }
            image_chw[c * plane + base] = v;
        }
    }
    image_chw
}

pub(crate) fn to_chw_sample(
    img: &image::RgbImage,
    label: EcgClass,
    index: usize,
    normalize: Option<&Normalize>,
) -> EcgSample {
    let (width, height) = img.dimensions();
    EcgSample {
        index,
        image_chw: to_chw(img, normalize),
        width,
        height,
        label,
    }
}

fn letterbox_resize(img: &image::RgbImage, target_w: u32, target_h: u32) -> image::RgbImage {
    let (w, h) = img.dimensions();
    let scale = f32::min(target_w as f32 / w as f32, target_h as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, target_w);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, target_h);
    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Triangle);

    let pad_w = (target_w - new_w) / 2;
    let pad_h = (target_h - new_h) / 2;

    let mut canvas = image::RgbImage::new(target_w, target_h);
    image::imageops::replace(&mut canvas, &resized, pad_w.into(), pad_h.into());
    canvas
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

pub(crate) fn maybe_jitter(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_noise(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise = rng.random_range(-strength..strength);
            let v = (pixel[c] as f32 / 255.0 + noise).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_blur(
    img: &mut image::RgbImage,
    prob: f32,
    sigma: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || sigma <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    *img = image::imageops::blur(img, sigma);
}

#[cfg(test)]
mod aug_tests {
    use super::*;

    #[test]
    fn hflip_mirrors_columns() {
        let mut img = image::RgbImage::from_fn(2, 1, |x, _| image::Rgb([x as u8 * 200, 0, 0]));
        let mut rng = rand::rng();
        maybe_hflip(&mut img, 1.0, &mut rng);
        assert_eq!(img.get_pixel(0, 0).0, [200, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn chw_layout_and_normalization() {
        let img = image::RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 255, 0])
            }
        });
        let plain = to_chw_sample(&img, EcgClass::Hb, 3, None);
        assert_eq!(plain.image_chw, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(plain.index, 3);

        let norm = Normalize {
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        };
        let normalized = to_chw_sample(&img, EcgClass::Hb, 0, Some(&norm));
        assert_eq!(normalized.image_chw, vec![1.0, -1.0, -1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn letterbox_pads_to_target() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([255, 255, 255]));
        let out = letterbox_resize(&img, 4, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [255, 255, 255]);
    }

    #[test]
    fn seeded_pipeline_is_deterministic() {
        let pipeline = TransformPipelineBuilder::new()
            .target_size(Some((8, 8)))
            .noise(1.0, 0.2)
            .seed(Some(7))
            .build();
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([100, 120, 140]));
        let a = pipeline.apply(img.clone(), EcgClass::Mi, 5).unwrap();
        let b = pipeline.apply(img, EcgClass::Mi, 5).unwrap();
        assert_eq!(a.image_chw, b.image_chw);
        assert_eq!((a.width, a.height), (8, 8));
    }
}
