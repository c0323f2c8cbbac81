//! Agreement statistics accumulated over one annotation run
//!
//! Rates use the total number of classified images as denominator, unlabeled
//! images included. `labeled` is reported next to them so the mismatch with
//! the numerators stays visible.

use serde::Serialize;
use std::fmt;

/// Decision threshold on the logistic output
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    /// Images classified
    pub processed: usize,
    /// Labeled images whose thresholded decision matched the label
    pub correct: usize,
    /// Predicted cell, labeled fake
    pub false_positives: usize,
    /// Predicted fake, labeled cell
    pub false_negatives: usize,
    pub labeled: usize,
    pub unlabeled: usize,
    /// Records that failed somewhere between decoding and merging
    pub skipped: usize,
}

impl AnnotationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one classified image
    pub fn record(&mut self, probability: f64, ground_truth: Option<bool>) {
        self.processed += 1;
        let Some(truth) = ground_truth else {
            self.unlabeled += 1;
            return;
        };
        self.labeled += 1;

        let predicted = probability >= DECISION_THRESHOLD;
        match (predicted, truth) {
            (p, t) if p == t => self.correct += 1,
            (true, false) => self.false_positives += 1,
            _ => self.false_negatives += 1,
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn accuracy(&self) -> f64 {
        self.fraction(self.correct)
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.fraction(self.false_positives)
    }

    pub fn false_negative_rate(&self) -> f64 {
        self.fraction(self.false_negatives)
    }

    fn fraction(&self, count: usize) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            count as f64 / self.processed as f64
        }
    }
}

impl fmt::Display for AnnotationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total accuracy: {:.4}, false positive rate: {:.4}, false negative rate: {:.4} \
             (processed {}, labeled {}, unlabeled {}, skipped {})",
            self.accuracy(),
            self.false_positive_rate(),
            self.false_negative_rate(),
            self.processed,
            self.labeled,
            self.unlabeled,
            self.skipped
        )
    }
}
