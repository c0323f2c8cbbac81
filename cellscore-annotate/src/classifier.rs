//! Classifier seam
//!
//! The driver only sees [`Classifier`]: one normalized image in, one raw logit
//! out. [`LinearClassifier`] is the bundled implementation, a single-logit
//! linear model over the normalized pixels loaded from JSON weights.

use crate::services::image_normalizer::{NormalizedImage, TARGET_SIZE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Weights file could not be read
    #[error("Cannot read weights {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    /// Weights file is not valid JSON for this model
    #[error("Invalid weights {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    /// Weight count does not match channels x 224 x 224
    #[error("Expected {expected} weights, found {found}")]
    WeightCount { expected: usize, found: usize },

    /// Image channel count differs from the model's
    #[error("Model expects {expected} channel(s), image has {found}")]
    ChannelMismatch { expected: usize, found: usize },

    /// Any failure inside an external model
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Image to raw logit, batch size one
pub trait Classifier {
    fn logit(&mut self, image: &NormalizedImage) -> Result<f32, ClassifierError>;
}

/// Standard logistic transform
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Deserialize)]
struct LinearWeights {
    channels: usize,
    weights: Vec<f32>,
    bias: f32,
}

/// Linear model over planar CHW pixels
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    channels: usize,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearClassifier {
    pub fn new(channels: usize, weights: Vec<f32>, bias: f32) -> Result<Self, ClassifierError> {
        let expected = channels * TARGET_SIZE as usize * TARGET_SIZE as usize;
        if weights.len() != expected {
            return Err(ClassifierError::WeightCount {
                expected,
                found: weights.len(),
            });
        }
        Ok(Self {
            channels,
            weights,
            bias,
        })
    }

    /// Load `{"channels": c, "weights": [...], "bias": b}`
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClassifierError::Read(path.to_path_buf(), e))?;
        let raw: LinearWeights = serde_json::from_str(&content)
            .map_err(|e| ClassifierError::Parse(path.to_path_buf(), e))?;

        tracing::info!(path = %path.display(), channels = raw.channels, "Loaded linear classifier");
        Self::new(raw.channels, raw.weights, raw.bias)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Classifier for LinearClassifier {
    fn logit(&mut self, image: &NormalizedImage) -> Result<f32, ClassifierError> {
        if image.channels() != self.channels {
            return Err(ClassifierError::ChannelMismatch {
                expected: self.channels,
                found: image.channels(),
            });
        }
        let dot: f32 = image
            .data()
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum();
        Ok(dot + self.bias)
    }
}
