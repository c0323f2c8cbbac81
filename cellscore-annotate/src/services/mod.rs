//! Annotation pipeline components
//!
//! Source indexing and image normalization feed the driver; identity
//! resolution and the table cache reconcile each prediction with its record.

pub mod annotation_driver;
pub mod identity_resolver;
pub mod image_normalizer;
pub mod source_indexer;
pub mod table_cache;

pub use annotation_driver::{AnnotationDriver, AnnotationReport};
pub use identity_resolver::{pair, CellId, IdentityResolver, ResolveError, ResolvedCell};
pub use image_normalizer::{ImageNormalizer, NormalizedImage, Sample, TARGET_SIZE};
pub use source_indexer::{SourceIndex, SourceIndexer};
pub use table_cache::TableCache;
