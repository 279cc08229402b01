//! Batch orchestration: fetch each selected document, rewrite its assets,
//! and record the outcome in the inventory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::inventory::{DocumentRecord, DocumentStatus, Inventory, RecordFilter};
use crate::normalize::capture_url;
use crate::rewriter::{DocumentContext, DocumentRewriter};
use crate::store::{non_empty_len, write_atomic, AssetStore};
use crate::wayback::{FetchMode, SnapshotResolver, WaybackClient};

/// Options for one `download` run.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub era: Option<String>,
    pub year: Option<i32>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<usize>,
    /// Re-offer downloaded documents for an asset re-scan.
    pub rescan_assets: bool,
    pub retry_failed: bool,
    /// Log the planned work without touching the network or disk.
    pub dry_run: bool,
}

impl DownloadOptions {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            era: self.era.clone(),
            year: self.year,
            from_date: self.from_date.clone(),
            to_date: self.to_date.clone(),
            limit: self.limit,
            include_failed: self.retry_failed,
            include_downloaded: self.rescan_assets,
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub selected: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Result of processing one document.
#[derive(Debug)]
enum DocumentOutcome {
    Downloaded { local_path: String },
    Failed { error: String },
}

pub struct Pipeline {
    config: Config,
    resolver: SnapshotResolver,
    rewriter: DocumentRewriter,
}

impl Pipeline {
    /// Build a pipeline talking to the archive configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let client = Arc::new(WaybackClient::new(&config)?);
        let resolver = SnapshotResolver::new(client, config.max_redirects);
        let rewriter = DocumentRewriter::new(resolver.clone(), config.asset_concurrency);
        Ok(Self {
            config,
            resolver,
            rewriter,
        })
    }

    /// Process every record selected by `options`, one batch at a time.
    ///
    /// The inventory is saved to `inventory_path` after each batch, so an
    /// interrupted run keeps everything finished before the interruption.
    ///
    /// # Errors
    ///
    /// Returns an error only if the inventory cannot be saved; individual
    /// document failures are recorded on their records.
    pub async fn run(
        &self,
        inventory: &mut Inventory,
        inventory_path: &Path,
        options: &DownloadOptions,
    ) -> Result<RunSummary> {
        let selected = inventory.select(&options.filter());
        let mut summary = RunSummary {
            selected: selected.len(),
            ..RunSummary::default()
        };

        if options.dry_run {
            for &index in &selected {
                let record = &inventory.records[index];
                info!(
                    id = %record.id,
                    url = %record.original_url,
                    timestamp = %record.timestamp,
                    status = %record.status,
                    "Would process document"
                );
            }
            info!(count = selected.len(), "Dry run, nothing fetched or written");
            return Ok(summary);
        }

        let batch_size = self.config.batch_size.max(1);
        let batches = selected.len().div_ceil(batch_size);

        for (batch_number, batch) in selected.chunks(batch_size).enumerate() {
            let work = batch.iter().map(|&index| {
                let record = inventory.records[index].clone();
                let rescan = options.rescan_assets;
                async move { (index, self.process_document(&record, rescan).await) }
            });
            let results = join_all(work).await;

            for (index, outcome) in results {
                let record = &mut inventory.records[index];
                match outcome {
                    DocumentOutcome::Downloaded { local_path } => {
                        record.status = DocumentStatus::Downloaded;
                        record.local_path = Some(local_path);
                        record.last_error = None;
                        summary.downloaded += 1;
                    }
                    DocumentOutcome::Failed { error } => {
                        record.status = DocumentStatus::Failed;
                        record.last_error = Some(error);
                        summary.failed += 1;
                    }
                }
            }

            inventory
                .save(inventory_path)
                .await
                .context("Failed to save inventory")?;
            info!(
                batch = batch_number + 1,
                batches,
                downloaded = summary.downloaded,
                failed = summary.failed,
                "Batch complete"
            );
        }

        Ok(summary)
    }

    async fn process_document(&self, record: &DocumentRecord, rescan: bool) -> DocumentOutcome {
        match self.process_document_inner(record, rescan).await {
            Ok(local_path) => DocumentOutcome::Downloaded { local_path },
            Err(e) => {
                let error = format!("{e:#}");
                error!(id = %record.id, url = %record.original_url, "Document failed: {error}");
                DocumentOutcome::Failed { error }
            }
        }
    }

    async fn process_document_inner(
        &self,
        record: &DocumentRecord,
        rescan: bool,
    ) -> Result<String> {
        let relative = record.relative_path()?;
        let path = record.document_path(&self.config.data_root)?;
        let url = capture_url(&record.original_url)
            .with_context(|| format!("Unusable document URL: {}", record.original_url))?;

        let (bytes, served_html) = if non_empty_len(&path).await.is_some() {
            debug!(path = %path.display(), "Document already on disk, skipping fetch");
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (bytes, false)
        } else {
            if rescan && record.status == DocumentStatus::Downloaded {
                warn!(path = %path.display(), "Downloaded document missing on disk, fetching again");
            }
            let snapshot = self
                .resolver
                .resolve(&url, &record.timestamp, FetchMode::Identity)
                .await?;
            write_atomic(&path, &snapshot.bytes).await?;
            debug!(
                url = %url,
                timestamp = %snapshot.timestamp,
                bytes = snapshot.bytes.len(),
                "Document fetched"
            );
            if !self.config.politeness_delay.is_zero() {
                tokio::time::sleep(self.config.politeness_delay).await;
            }
            let html = snapshot.is_html();
            (snapshot.bytes, html)
        };

        if served_html || record.looks_like_html() {
            self.rewrite_document(record, url, &path, &bytes).await?;
        }

        Ok(relative_display(&relative))
    }

    async fn rewrite_document(
        &self,
        record: &DocumentRecord,
        url: Url,
        path: &Path,
        bytes: &[u8],
    ) -> Result<()> {
        let store = AssetStore::for_era(&self.config.data_root, &record.era)?;
        let ctx = DocumentContext {
            url,
            timestamp: record.timestamp.clone(),
            store: &store,
        };

        let report = self.rewriter.rewrite(bytes, &ctx).await;
        if report.rewritten > 0 {
            write_atomic(path, &report.body).await?;
        }
        Ok(())
    }
}

/// Forward-slash form of a data-root-relative path.
fn relative_display(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
