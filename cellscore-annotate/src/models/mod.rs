//! Data models for the annotation pipeline

pub mod annotation_stats;
pub mod indexed_image;

pub use annotation_stats::AnnotationStats;
pub use indexed_image::{IndexedImage, Label};
