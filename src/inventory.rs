//! Persistent list of documents to restore and how far each has got.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ArchiveError;
use crate::store::{safe_join, write_atomic};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("inventory {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize inventory: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write inventory: {0}")]
    Write(#[source] ArchiveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Discovered,
    Downloaded,
    Failed,
}

impl DocumentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document to restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Logical id: the capture's content digest.
    pub id: String,
    pub era: String,
    pub year: i32,
    pub category: String,
    pub filename: String,
    pub original_url: String,
    pub archived_url: String,
    pub timestamp: String,
    #[serde(default)]
    pub mime_type: String,
    pub status: DocumentStatus,
    /// Path relative to the data root, set once downloaded.
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl DocumentRecord {
    /// `{era}/{year}/{category}/{filename}`, relative to the data root.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsafePath`] if any component could escape
    /// the data root.
    pub fn relative_path(&self) -> Result<PathBuf, ArchiveError> {
        let year = self.year.to_string();
        safe_join(
            Path::new(""),
            &[&self.era, &year, &self.category, &self.filename],
        )
    }

    /// Absolute location of the document under `data_root`.
    ///
    /// # Errors
    ///
    /// See [`DocumentRecord::relative_path`].
    pub fn document_path(&self, data_root: &Path) -> Result<PathBuf, ArchiveError> {
        Ok(data_root.join(self.relative_path()?))
    }

    /// Whether the record itself says this is a web page.
    #[must_use]
    pub fn looks_like_html(&self) -> bool {
        let name = self.filename.to_ascii_lowercase();
        self.mime_type.to_ascii_lowercase().contains("html")
            || name.ends_with(".html")
            || name.ends_with(".htm")
            || name.ends_with(".shtml")
    }

    /// `YYYYMMDD` part of the capture timestamp.
    fn capture_date(&self) -> &str {
        self.timestamp.get(..8).unwrap_or(&self.timestamp)
    }
}

/// Which records a run should touch.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub era: Option<String>,
    pub year: Option<i32>,
    /// Inclusive `YYYYMMDD` bounds on the capture date.
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<usize>,
    pub include_failed: bool,
    pub include_downloaded: bool,
}

impl RecordFilter {
    fn matches(&self, record: &DocumentRecord) -> bool {
        let status_ok = match record.status {
            DocumentStatus::Discovered => true,
            DocumentStatus::Failed => self.include_failed,
            DocumentStatus::Downloaded => self.include_downloaded,
        };
        status_ok
            && self.era.as_deref().is_none_or(|era| record.era == era)
            && self.year.is_none_or(|year| record.year == year)
            && self
                .from_date
                .as_deref()
                .is_none_or(|from| record.capture_date() >= from)
            && self
                .to_date
                .as_deref()
                .is_none_or(|to| record.capture_date() <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub records: Vec<DocumentRecord>,
}

impl Inventory {
    /// Load the inventory at `path`. A missing file is an empty inventory.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Corrupt`] if the file exists but is not a
    /// valid inventory, and [`InventoryError::Read`] if it cannot be read.
    pub async fn load(path: &Path) -> Result<Self, InventoryError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No inventory yet, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(InventoryError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| InventoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the whole inventory to `path`, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<(), InventoryError> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
            .await
            .map_err(InventoryError::Write)
    }

    /// Add records whose id is not already present.
    ///
    /// A filename already taken in the same `(era, year, category)`
    /// directory gets the capture timestamp inserted before its extension.
    /// Returns the number of records added.
    pub fn merge_catalog(&mut self, incoming: Vec<DocumentRecord>) -> usize {
        let mut ids: HashSet<String> = self.records.iter().map(|r| r.id.clone()).collect();
        let mut taken: HashSet<FileKey> = self.records.iter().map(file_key).collect();

        let mut added = 0;
        for mut record in incoming {
            if !ids.insert(record.id.clone()) {
                continue;
            }

            if taken.contains(&file_key(&record)) {
                record.filename = with_timestamp(&record.filename, &record.timestamp);
            }
            taken.insert(file_key(&record));

            self.records.push(record);
            added += 1;
        }
        added
    }

    /// Indices of records matching `filter`, in inventory order, capped at
    /// the filter's limit.
    #[must_use]
    pub fn select(&self, filter: &RecordFilter) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r))
            .map(|(i, _)| i)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Put records with status `from` (optionally only in `era`) back to
    /// discovered. Returns how many changed.
    pub fn reset_status(&mut self, era: Option<&str>, from: DocumentStatus) -> usize {
        let mut count = 0;
        for record in &mut self.records {
            if record.status == from && era.is_none_or(|e| record.era == e) {
                record.status = DocumentStatus::Discovered;
                record.last_error = None;
                count += 1;
            }
        }
        count
    }

    /// Number of records per era and status.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, BTreeMap<DocumentStatus, usize>> {
        let mut counts: BTreeMap<String, BTreeMap<DocumentStatus, usize>> = BTreeMap::new();
        for record in &self.records {
            *counts
                .entry(record.era.clone())
                .or_default()
                .entry(record.status)
                .or_default() += 1;
        }
        counts
    }
}

/// Parse a capture date bound given as `YYYYMMDD` or `YYYY-MM-DD` into
/// the `YYYYMMDD` form compared against timestamps.
///
/// # Errors
///
/// Returns an error if the value is not a calendar date.
pub fn parse_date_bound(value: &str) -> Result<String, chrono::ParseError> {
    let date = NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))?;
    Ok(date.format("%Y%m%d").to_string())
}

type FileKey = (String, i32, String, String);

fn file_key(r: &DocumentRecord) -> FileKey {
    (r.era.clone(), r.year, r.category.clone(), r.filename.clone())
}

fn with_timestamp(filename: &str, timestamp: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{timestamp}.{ext}"),
        _ => format!("{filename}_{timestamp}"),
    }
}
