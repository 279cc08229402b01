//! Document rewriting: find every embedded resource in a page, pull each
//! from the archive once, and point the page at the local copies.
//!
//! Work happens in three phases so the parsed document is never mutated
//! while being read: scan the markup for reference sites, resolve and store
//! each distinct reference concurrently, then splice all local paths into
//! the original bytes in one pass.

mod apply;
mod references;
mod scan;

use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

pub use apply::apply_rewrites;
pub use references::{
    classify, has_attachment_extension, ReferenceKind, ReferenceSite, ResourceReference,
};
pub use scan::{scan_references, ScannedReference};

use crate::error::ArchiveError;
use crate::normalize::resolve_reference;
use crate::store::{local_asset_prefix, AssetStore, ResolvedAsset};
use crate::wayback::SnapshotResolver;

/// Where a document came from and where its assets go.
pub struct DocumentContext<'a> {
    pub url: Url,
    pub timestamp: String,
    pub store: &'a AssetStore,
}

/// What happened to one reference.
#[derive(Debug)]
pub enum ReferenceOutcome {
    /// Fetched from the archive and stored.
    Stored(ResolvedAsset),
    /// Already present in the store; nothing fetched.
    Reused(ResolvedAsset),
    /// Not a fetchable resource.
    Skipped(ArchiveError),
    /// Fetchable in principle but no copy could be obtained.
    Failed(ArchiveError),
}

impl ReferenceOutcome {
    #[must_use]
    pub fn asset(&self) -> Option<&ResolvedAsset> {
        match self {
            Self::Stored(asset) | Self::Reused(asset) => Some(asset),
            Self::Skipped(_) | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of rewriting one document.
#[derive(Debug)]
pub struct RewriteReport {
    pub body: Vec<u8>,
    pub outcomes: Vec<(ResourceReference, ReferenceOutcome)>,
    /// Attribute values replaced in `body`.
    pub rewritten: usize,
}

impl RewriteReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }

    #[must_use]
    pub fn fetched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ReferenceOutcome::Stored(_)))
            .count()
    }
}

/// Rewrites documents against an archive and an asset store.
#[derive(Clone)]
pub struct DocumentRewriter {
    resolver: SnapshotResolver,
    concurrency: usize,
    local_prefix: String,
}

impl DocumentRewriter {
    #[must_use]
    pub fn new(resolver: SnapshotResolver, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
            local_prefix: local_asset_prefix(),
        }
    }

    /// Rewrite `html` so its resources load from the local asset store.
    ///
    /// References that cannot be resolved are left exactly as they were.
    pub async fn rewrite(&self, html: &[u8], ctx: &DocumentContext<'_>) -> RewriteReport {
        // Phase 1: scan
        let text = String::from_utf8_lossy(html);
        let references: Vec<ResourceReference> = scan_references(&text, &self.local_prefix)
            .into_iter()
            .map(|scanned| ResourceReference {
                document_url: ctx.url.clone(),
                document_timestamp: ctx.timestamp.clone(),
                raw: scanned.raw,
                kind: scanned.kind,
            })
            .collect();
        debug!(url = %ctx.url, references = references.len(), "Scanned document");

        // Phase 2: resolve
        let outcomes: Vec<(ResourceReference, ReferenceOutcome)> = stream::iter(references)
            .map(|reference| async move {
                let outcome = self.resolve_one(&reference, ctx.store).await;
                (reference, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        // Phase 3: apply
        let replacements: HashMap<String, String> = outcomes
            .iter()
            .filter_map(|(reference, outcome)| {
                outcome.asset().map(|asset| {
                    (
                        reference.raw.clone(),
                        format!("{}{}", self.local_prefix, asset.local_file_name),
                    )
                })
            })
            .collect();
        let (body, rewritten) = apply_rewrites(html, &replacements);

        let report = RewriteReport {
            body,
            outcomes,
            rewritten,
        };
        info!(
            url = %ctx.url,
            rewritten = report.rewritten,
            fetched = report.fetched(),
            failed = report.failures(),
            "Document rewritten"
        );
        report
    }

    async fn resolve_one(
        &self,
        reference: &ResourceReference,
        store: &AssetStore,
    ) -> ReferenceOutcome {
        let canonical = match resolve_reference(&reference.raw, &reference.document_url) {
            Ok(url) => url,
            Err(e) => {
                debug!(reference = %reference.raw, reason = %e, "Skipping reference");
                return ReferenceOutcome::Skipped(e);
            }
        };

        match store.existing(&canonical, reference.kind).await {
            Ok(Some(asset)) => return ReferenceOutcome::Reused(asset),
            Ok(None) => {}
            Err(e) => return ReferenceOutcome::Failed(e),
        }

        let snapshot = match self
            .resolver
            .resolve(
                &canonical,
                &reference.document_timestamp,
                reference.kind.fetch_mode(),
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    url = %canonical,
                    kind = reference.kind.as_str(),
                    document = %reference.document_url,
                    error = %e,
                    "Reference left unrewritten"
                );
                return ReferenceOutcome::Failed(e);
            }
        };

        match store
            .store(&canonical, &snapshot.timestamp, &snapshot.bytes, reference.kind)
            .await
        {
            Ok(asset) => ReferenceOutcome::Stored(asset),
            Err(e) => {
                warn!(url = %canonical, error = %e, "Failed to store asset");
                ReferenceOutcome::Failed(e)
            }
        }
    }
}
