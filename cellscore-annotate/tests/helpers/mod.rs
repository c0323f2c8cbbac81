//! Shared fixtures for cellscore-annotate integration tests

#![allow(dead_code)]

use cellscore_annotate::classifier::{Classifier, ClassifierError};
use cellscore_annotate::services::NormalizedImage;
use image::{GrayImage, Luma};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

/// Returns queued logits in call order, then `fallback`
pub struct ScriptedClassifier {
    logits: VecDeque<f32>,
    fallback: f32,
    pub calls: usize,
}

impl ScriptedClassifier {
    pub fn new(logits: &[f32]) -> Self {
        Self {
            logits: logits.iter().copied().collect(),
            fallback: 0.0,
            calls: 0,
        }
    }

    pub fn constant(logit: f32) -> Self {
        Self {
            logits: VecDeque::new(),
            fallback: logit,
            calls: 0,
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn logit(&mut self, _image: &NormalizedImage) -> Result<f32, ClassifierError> {
        self.calls += 1;
        Ok(self.logits.pop_front().unwrap_or(self.fallback))
    }
}

/// Write a small gray PNG into `source/bucket/name`
pub fn write_image(source: &Path, bucket: &str, name: &str) -> PathBuf {
    let dir = source.join(bucket);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    GrayImage::from_fn(12, 9, |x, y| Luma([(x * 20 + y) as u8]))
        .save(&path)
        .unwrap();
    path
}

/// Write `content` to `path`, creating parent directories
pub fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Probability the driver stores for `logit`
pub fn confidence(logit: f64) -> f64 {
    1.0 / (1.0 + (-logit).exp())
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {} to be close to {}",
        actual,
        expected
    );
}
