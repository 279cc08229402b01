//! Error taxonomy for resolving, fetching and storing archived resources.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single resource or document operation.
///
/// None of these are fatal to a run: references that fail are left
/// unrewritten, documents that fail are marked `failed` in the inventory.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Not a fetchable resource (`data:`, `#`, `mailto:`, empty, malformed).
    #[error("unresolvable reference '{reference}': {reason}")]
    UnresolvableReference { reference: String, reason: String },

    /// No retrievable archived copy exists.
    #[error("no snapshot available for {url}: {reason}")]
    SnapshotUnavailable { url: String, reason: String },

    /// The archive kept answering 429 after all backoff attempts.
    #[error("rate limited by archive while fetching {url}")]
    RateLimited { url: String },

    /// Network failure after all retries.
    #[error("transport failure fetching {url}: {source}")]
    TransportFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A local destination would fall outside the data root.
    #[error("unsafe path rejected: {}", path.display())]
    UnsafePath { path: PathBuf },

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn unavailable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SnapshotUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolvable(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvableReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure is a deliberate skip rather than a real error.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::UnresolvableReference { .. })
    }
}
