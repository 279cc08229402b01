//! Finding what the archive holds for an era and turning captures into
//! inventory records.

mod classify;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

pub use classify::{classify_category, derive_filename, sanitize_filename};

use crate::inventory::{DocumentRecord, DocumentStatus};
use crate::normalize::capture_url;
use crate::sites::Era;
use crate::wayback::{FetchMode, WaybackClient};

/// Fetch state of a catalog entry. The inventory record carries the same
/// lifecycle once the entry is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogStatus {
    Discovered,
    Fetched,
    Failed,
}

impl From<CatalogStatus> for DocumentStatus {
    fn from(status: CatalogStatus) -> Self {
        match status {
            CatalogStatus::Discovered => Self::Discovered,
            CatalogStatus::Fetched => Self::Downloaded,
            CatalogStatus::Failed => Self::Failed,
        }
    }
}

/// One distinct capture found in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Content digest; identical captures share it.
    pub logical_id: String,
    pub original_url: Url,
    pub timestamp: String,
    pub mime_hint: String,
    pub status: CatalogStatus,
}

impl CatalogEntry {
    /// Four-digit capture year.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.timestamp.get(..4)?.parse().ok()
    }
}

/// CDX-backed discovery.
pub struct Discovery {
    client: Arc<WaybackClient>,
}

impl Discovery {
    #[must_use]
    pub fn new(client: Arc<WaybackClient>) -> Self {
        Self { client }
    }

    /// Distinct status-200 captures matching `pattern`, in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried or parsed.
    pub async fn search(
        &self,
        pattern: &str,
        from_year: Option<i32>,
        to_year: Option<i32>,
    ) -> Result<Vec<CatalogEntry>> {
        let rows = self.client.search(pattern, from_year, to_year).await?;
        let total = rows.len();

        let mut seen = HashSet::new();
        let entries: Vec<CatalogEntry> = rows
            .into_iter()
            .filter(|row| row.statuscode == "200")
            .filter_map(|row| {
                let Some(original_url) = capture_url(&row.original) else {
                    debug!(url = %row.original, "Skipping capture with unusable URL");
                    return None;
                };
                let logical_id = if row.digest.is_empty() {
                    let key = format!("{original_url} {}", row.timestamp);
                    hex::encode(Sha256::digest(key.as_bytes()))
                } else {
                    row.digest
                };
                Some(CatalogEntry {
                    logical_id,
                    original_url,
                    timestamp: row.timestamp,
                    mime_hint: row.mimetype,
                    status: CatalogStatus::Discovered,
                })
            })
            .filter(|entry| seen.insert(entry.logical_id.clone()))
            .collect();

        info!(pattern, rows = total, captures = entries.len(), "CDX search complete");
        Ok(entries)
    }

    /// Inventory records for `entries` found in `era`.
    ///
    /// Captures without a parseable year are dropped.
    #[must_use]
    pub fn records_for_era(&self, era: &Era, entries: Vec<CatalogEntry>) -> Vec<DocumentRecord> {
        entries
            .into_iter()
            .filter_map(|entry| {
                let Some(year) = entry.year() else {
                    debug!(timestamp = %entry.timestamp, "Skipping capture without a year");
                    return None;
                };
                let original = entry.original_url.to_string();
                Some(DocumentRecord {
                    id: entry.logical_id,
                    era: era.name.clone(),
                    year,
                    category: classify_category(&entry.original_url, &entry.mime_hint, era),
                    filename: derive_filename(&entry.original_url, &entry.mime_hint),
                    archived_url: self.client.archived_address(
                        &entry.timestamp,
                        FetchMode::Identity,
                        &original,
                    ),
                    original_url: original,
                    timestamp: entry.timestamp,
                    mime_type: entry.mime_hint,
                    status: entry.status.into(),
                    local_path: None,
                    last_error: None,
                })
            })
            .collect()
    }

    /// Search `era` and build its records. Explicit years override the
    /// era's own range.
    ///
    /// # Errors
    ///
    /// See [`Discovery::search`].
    pub async fn discover_era(
        &self,
        era: &Era,
        from_year: Option<i32>,
        to_year: Option<i32>,
    ) -> Result<Vec<DocumentRecord>> {
        let entries = self
            .search(
                &era.url_pattern,
                from_year.or(era.from_year),
                to_year.or(era.to_year),
            )
            .await?;
        Ok(self.records_for_era(era, entries))
    }
}
