//! Core records of the price-history model and the transient values that
//! flow through the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A uniquely named tracked entity whose price is observed over time.
///
/// Created on first sighting of its name and never mutated afterwards; a
/// later record carrying a different category does not update it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    /// Unique business key.
    pub name: String,
    /// Informational only.
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    pub category: String,
}

/// One timestamped price fact for a [`Resource`]. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: String,
    pub resource_id: String,
    pub value: i64,
    pub observed_at: DateTime<Utc>,
}

/// A `{name, category, price}` triple produced by the parser and consumed by
/// the store gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractionRecord {
    pub name: String,
    pub category: String,
    pub price: i64,
}

impl ExtractionRecord {
    pub fn new(name: impl Into<String>, category: impl Into<String>, price: i64) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            price,
        }
    }
}

/// Kind of input a watched file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Image,
    Text,
}

impl FileKind {
    const IMAGE_EXTENSIONS: [&'static str; 4] = ["jpg", "jpeg", "png", "bmp"];

    /// Classify a path by extension (case-insensitive). Pipeline artifacts
    /// (`*_analysis.txt`) are never classified as input.
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if Self::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Some(Self::Image);
        }
        if ext == "txt" {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem.ends_with(ANALYSIS_SUFFIX) {
                return None;
            }
            return Some(Self::Text);
        }
        None
    }

    /// Prefix of the canonical quarantine name.
    pub fn canonical_prefix(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

/// Suffix appended to a text file name for its analysis artifact.
pub const ANALYSIS_SUFFIX: &str = "_analysis";

/// A file picked up from the watched folder.
///
/// `original` is the path the producer wrote; `current` follows the file
/// through quarantine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub original: PathBuf,
    pub current: PathBuf,
    pub kind: FileKind,
}

impl WatchedFile {
    pub fn detect(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let kind = FileKind::detect(&path)?;
        Some(Self {
            current: path.clone(),
            original: path,
            kind,
        })
    }

    /// File name as the producer wrote it.
    pub fn original_name(&self) -> String {
        self.original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Name of the artifact the text pipeline writes for this file.
    pub fn analysis_name(&self) -> String {
        format!("{}{ANALYSIS_SUFFIX}.txt", self.original_name())
    }

    /// Where the artifact is moved when the run that wrote it failed in a
    /// way a later run can fix. Not a watched extension.
    pub fn failed_analysis_name(&self) -> String {
        format!("{}.failed", self.analysis_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_image_extensions_case_insensitively() {
        for name in ["a.jpg", "a.JPEG", "a.Png", "a.bmp"] {
            assert_eq!(FileKind::detect(Path::new(name)), Some(FileKind::Image));
        }
    }

    #[test]
    fn test_detects_text() {
        assert_eq!(FileKind::detect(Path::new("dump.txt")), Some(FileKind::Text));
    }

    #[test]
    fn test_ignores_other_extensions() {
        assert_eq!(FileKind::detect(Path::new("a.gif")), None);
        assert_eq!(FileKind::detect(Path::new("noext")), None);
    }

    #[test]
    fn test_ignores_analysis_artifacts() {
        assert_eq!(FileKind::detect(Path::new("dump.txt_analysis.txt")), None);
    }

    #[test]
    fn test_analysis_name_uses_original_file_name() {
        let mut file = WatchedFile::detect("/in/prices.txt").unwrap();
        file.current = PathBuf::from("/in/text_20240101_000000_000.txt");
        assert_eq!(file.analysis_name(), "prices.txt_analysis.txt");
    }

    #[test]
    fn test_failed_analysis_is_not_watched() {
        let file = WatchedFile::detect("/in/prices.txt").unwrap();
        assert_eq!(file.failed_analysis_name(), "prices.txt_analysis.txt.failed");
        assert_eq!(FileKind::detect(Path::new(&file.failed_analysis_name())), None);
    }
}
