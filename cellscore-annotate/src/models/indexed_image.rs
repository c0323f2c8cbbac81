//! Indexed image model

use std::fmt;
use std::path::PathBuf;

/// Ground-truth label of an indexed image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// `fakes/` (label 0)
    Negative,
    /// `cells/` (label 1)
    Positive,
    /// `unclassified/` indexed without a label
    Unknown,
}

impl Label {
    /// True for a real cell, false for an artifact, None without ground truth
    pub fn ground_truth(self) -> Option<bool> {
        match self {
            Label::Negative => Some(false),
            Label::Positive => Some(true),
            Label::Unknown => None,
        }
    }

    /// Label tensor of shape (1,)
    pub fn as_tensor(self) -> Option<[f32; 1]> {
        self.ground_truth().map(|t| [if t { 1.0 } else { 0.0 }])
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Negative => write!(f, "0"),
            Label::Positive => write!(f, "1"),
            Label::Unknown => write!(f, "unknown"),
        }
    }
}

/// One image file with its label and fixed position in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    /// Absolute path
    pub path: PathBuf,
    pub label: Label,
    /// Position in the index, assigned once at build time
    pub ordinal: usize,
}
