//! Frame-name to frame-number lookup
//!
//! Sibling CSV of a cell table (`cells` → `frames` in the path) with the
//! columns `frame_name` and `frame_id`. Read-only.

use super::TableError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const FRAME_NAME_COLUMN: &str = "frame_name";
pub const FRAME_ID_COLUMN: &str = "frame_id";

/// Frames table path for a cell table path
pub fn frames_path_for(table_path: &Path) -> PathBuf {
    PathBuf::from(table_path.to_string_lossy().replace("cells", "frames"))
}

#[derive(Debug, Clone, Default)]
pub struct FramesTable {
    frames: HashMap<String, u64>,
}

impl FramesTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers = reader.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TableError::MissingColumn {
                    column: name.to_string(),
                    path: path.to_path_buf(),
                })
        };
        let name_col = column(FRAME_NAME_COLUMN)?;
        let id_col = column(FRAME_ID_COLUMN)?;

        let mut frames = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let (Some(name), Some(id)) = (record.get(name_col), record.get(id_col)) else {
                continue;
            };
            let id = parse_frame_id(id).ok_or_else(|| {
                TableError::InvalidValue(format!("frame '{}' has non-integer frame_id '{}'", name, id))
            })?;
            frames.entry(name.to_string()).or_insert(id);
        }

        tracing::debug!(path = %path.display(), frames = frames.len(), "Loaded frames table");
        Ok(Self { frames })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            frames: pairs.into_iter().map(|(n, f)| (n.into(), f)).collect(),
        }
    }

    pub fn frame_number(&self, frame_name: &str) -> Option<u64> {
        self.frames.get(frame_name).copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn parse_frame_id(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(id) = text.parse::<u64>() {
        return Some(id);
    }
    let value: f64 = text.parse().ok()?;
    (value >= 0.0 && value.fract() == 0.0).then_some(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_frames_path_substitution() {
        assert_eq!(
            frames_path_for(Path::new("/d/pos1/out/cells_2022.csv")),
            PathBuf::from("/d/pos1/out/frames_2022.csv")
        );
    }

    #[test]
    fn test_load_frames() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("frames.csv");
        std::fs::write(&path, "frame_id,frame_name,extra\n4,posA_3,x\n5.0,posA_4,y\n").unwrap();

        let frames = FramesTable::load(&path).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.frame_number("posA_3"), Some(4));
        assert_eq!(frames.frame_number("posA_4"), Some(5));
        assert_eq!(frames.frame_number("posA_9"), None);
    }

    #[test]
    fn test_missing_column() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("frames.csv");
        std::fs::write(&path, "name,frame\nposA_3,4\n").unwrap();

        let err = FramesTable::load(&path).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn { .. }));
    }
}
