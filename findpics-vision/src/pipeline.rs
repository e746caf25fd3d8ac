use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::{Detection, Detector, Embedding, Encoder};

/// Full per-image pipeline: detect faces, align each, encode each.
///
/// Holds two ONNX sessions; batch workers each load their own copy.
pub struct Pipeline {
    detector: Detector,
    encoder: Encoder,
    score_threshold: f32,
    nms_threshold: f32,
}

impl Pipeline {
    pub fn load(models_dir: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        Ok(Self {
            detector: Detector::load(models_dir).context("loading face detector")?,
            encoder: Encoder::load(models_dir).context("loading face recognizer")?,
            score_threshold,
            nms_threshold,
        })
    }

    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        self.detector
            .detect(img, self.score_threshold, self.nms_threshold)
    }

    /// One embedding per detected face. An image with no faces yields an
    /// empty vec, not an error.
    pub fn embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        let faces = self.detect(img)?;
        faces
            .iter()
            .map(|face| self.encoder.encode(img, face))
            .collect()
    }
}
