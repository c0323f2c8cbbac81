//! Error types for cellscore-annotate
//!
//! Per-record failures ([`AnnotateError::Resolve`], [`AnnotateError::Image`],
//! [`AnnotateError::Classifier`], row lookups) are skipped and counted by the
//! driver. Only configuration and flush failures end a run.

use crate::classifier::ClassifierError;
use crate::services::identity_resolver::ResolveError;
use crate::tables::TableError;
use std::path::PathBuf;
use thiserror::Error;

/// Annotation pipeline error type
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// Table load, merge or save failure
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Image path could not be mapped to a table record
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Image could not be opened or decoded
    #[error("Image error {0}: {1}")]
    Image(PathBuf, #[source] image::ImageError),

    /// Classifier failed to load or to score an image
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Result type for annotation operations
pub type AnnotateResult<T> = Result<T, AnnotateError>;
