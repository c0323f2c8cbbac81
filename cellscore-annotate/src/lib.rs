//! cellscore-annotate library interface
//!
//! Writes classifier confidences back into the per-cell tables produced by
//! earlier pipeline stages. Exposes the pipeline for the binary and for
//! integration testing.

pub mod classifier;
pub mod error;
pub mod models;
pub mod services;
pub mod tables;

pub use crate::classifier::{logistic, Classifier, ClassifierError, LinearClassifier};
pub use crate::error::{AnnotateError, AnnotateResult};
