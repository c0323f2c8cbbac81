//! Annotation run driver
//!
//! Walks the index in ordinal order, once per image:
//! 1. normalize
//! 2. classify (logit, then logistic)
//! 3. record agreement statistics
//! 4. resolve the owning table and record
//! 5. merge the confidence into the cached table
//!
//! A failure in any step skips that image only. Tables are flushed once, after
//! the last image.

use crate::classifier::{logistic, Classifier};
use crate::error::AnnotateResult;
use crate::models::{AnnotationStats, IndexedImage};
use crate::services::identity_resolver::IdentityResolver;
use crate::services::image_normalizer::ImageNormalizer;
use crate::services::source_indexer::SourceIndex;
use crate::services::table_cache::TableCache;
use cellscore_common::config::ActivationConfig;
use std::path::PathBuf;
use tracing::{info, warn};

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct AnnotationReport {
    pub stats: AnnotationStats,
    /// Tables written, in first-reference order (empty on a dry run)
    pub written: Vec<PathBuf>,
    /// Distinct tables touched
    pub tables: usize,
}

pub struct AnnotationDriver {
    normalizer: ImageNormalizer,
    resolver: IdentityResolver,
    cache: TableCache,
    dry_run: bool,
}

impl AnnotationDriver {
    pub fn new(normalizer: ImageNormalizer, resolver: IdentityResolver, cache: TableCache) -> Self {
        Self {
            normalizer,
            resolver,
            cache,
            dry_run: false,
        }
    }

    pub fn from_config(config: &ActivationConfig) -> Self {
        Self::new(
            ImageNormalizer::new(config.resize_policy),
            IdentityResolver::from_config(config),
            TableCache::new(config.table_variable.clone()),
        )
    }

    /// Classify, resolve and merge without writing any table
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Annotate every indexed image, then flush
    ///
    /// Only a flush failure is returned as an error.
    pub fn run(mut self, index: &SourceIndex, classifier: &mut dyn Classifier) -> AnnotateResult<AnnotationReport> {
        let total = index.len();
        let mut stats = AnnotationStats::new();
        info!(images = total, strategy = %self.resolver.strategy(), "Starting annotation");

        for (i, image) in index.iter().enumerate() {
            if let Err(e) = self.annotate_one(image, classifier, &mut stats) {
                warn!("Skipping {}: {}", image.path.display(), e);
                stats.record_skip();
            }
            info!("completed image {} of {}", i + 1, total);
        }

        info!("total accuracy: {}", stats.accuracy());
        info!("false positives: {}", stats.false_positive_rate());
        info!("false negatives: {}", stats.false_negative_rate());
        info!(
            processed = stats.processed,
            labeled = stats.labeled,
            unlabeled = stats.unlabeled,
            skipped = stats.skipped,
            "Annotation summary"
        );

        let tables = self.cache.len();
        if self.dry_run {
            info!(tables, "Dry run, no files saved");
            return Ok(AnnotationReport {
                stats,
                written: Vec::new(),
                tables,
            });
        }

        info!("saving files...");
        let written = self.cache.flush_all()?;
        Ok(AnnotationReport {
            stats,
            written,
            tables,
        })
    }

    fn annotate_one(
        &mut self,
        image: &IndexedImage,
        classifier: &mut dyn Classifier,
        stats: &mut AnnotationStats,
    ) -> AnnotateResult<()> {
        let sample = self.normalizer.load(image)?;
        let logit = classifier.logit(&sample.image)?;
        let confidence = logistic(f64::from(logit));
        stats.record(confidence, image.label.ground_truth());

        let resolved = self.resolver.resolve(&image.path)?;
        let row = self.cache.set_confidence(&resolved.table, resolved.cell, confidence)?;
        tracing::debug!(
            path = %image.path.display(),
            table = %resolved.table.display(),
            row,
            confidence,
            "Merged confidence"
        );
        Ok(())
    }
}
