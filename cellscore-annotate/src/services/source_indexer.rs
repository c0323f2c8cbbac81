//! Source directory indexer
//!
//! Every source directory holds up to three buckets:
//! - `fakes/`: negative examples (label 0)
//! - `cells/`: positive examples (label 1)
//! - `unclassified/`: placed according to [`UnclassifiedPolicy`]
//!
//! The index lists all label 0 images first, then label 1, then unlabeled.
//! Within a label, sources keep configuration order and files keep the
//! order the filesystem lists them in.

use crate::models::{IndexedImage, Label};
use cellscore_common::config::{UnclassifiedPolicy, NEGATIVE_BUCKET};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Bucket holding positive examples
pub const POSITIVE_BUCKET: &str = "cells";

/// Bucket holding images without ground truth
pub const UNCLASSIFIED_BUCKET: &str = "unclassified";

/// Flat, order-preserving index over every source
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    images: Vec<IndexedImage>,
}

impl SourceIndex {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<&IndexedImage> {
        self.images.get(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedImage> {
        self.images.iter()
    }

    /// Number of images carrying `label`
    pub fn count(&self, label: Label) -> usize {
        self.images.iter().filter(|i| i.label == label).count()
    }
}

/// Image indexer over source directories
pub struct SourceIndexer {
    policy: UnclassifiedPolicy,
    ignore_patterns: Vec<String>,
}

impl SourceIndexer {
    /// Create an indexer that skips system files like .DS_Store and Thumbs.db
    pub fn new(policy: UnclassifiedPolicy) -> Self {
        Self {
            policy,
            ignore_patterns: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
        }
    }

    /// Build the index. Missing buckets contribute nothing.
    pub fn index(&self, sources: &[PathBuf]) -> SourceIndex {
        let mut negatives = Vec::new();
        let mut positives = Vec::new();
        let mut unknown = Vec::new();

        for source in sources {
            let source = absolute(source);
            negatives.extend(self.list_bucket(&source.join(NEGATIVE_BUCKET)));
            positives.extend(self.list_bucket(&source.join(POSITIVE_BUCKET)));

            let target = match self.policy {
                UnclassifiedPolicy::Exclude => continue,
                UnclassifiedPolicy::Negative => &mut negatives,
                UnclassifiedPolicy::Positive => &mut positives,
                UnclassifiedPolicy::Unlabeled => &mut unknown,
            };
            target.extend(self.list_bucket(&source.join(UNCLASSIFIED_BUCKET)));
        }

        let mut seen = HashSet::new();
        let mut images = Vec::with_capacity(negatives.len() + positives.len() + unknown.len());
        let labeled = [
            (negatives, Label::Negative),
            (positives, Label::Positive),
            (unknown, Label::Unknown),
        ];
        for (files, label) in labeled {
            for path in files {
                if !seen.insert(path.clone()) {
                    tracing::debug!(path = %path.display(), "Already indexed, skipping");
                    continue;
                }
                let ordinal = images.len();
                images.push(IndexedImage {
                    path,
                    label,
                    ordinal,
                });
            }
        }

        let index = SourceIndex { images };
        tracing::info!(
            sources = sources.len(),
            negatives = index.count(Label::Negative),
            positives = index.count(Label::Positive),
            unlabeled = index.count(Label::Unknown),
            "Indexed source images"
        );
        index
    }

    /// Files directly inside `bucket`, in listing order
    fn list_bucket(&self, bucket: &Path) -> Vec<PathBuf> {
        if !bucket.is_dir() {
            tracing::debug!(bucket = %bucket.display(), "Bucket missing, skipping");
            return Vec::new();
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(bucket).min_depth(1).max_depth(1).into_iter();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let name = entry.file_name().to_string_lossy();
                    if self.ignore_patterns.iter().any(|p| name.contains(p.as_str())) {
                        continue;
                    }
                    // Follows symlinks, so a link to a directory is skipped too
                    if entry.path().is_dir() {
                        continue;
                    }
                    files.push(entry.into_path());
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }
        files
    }
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
