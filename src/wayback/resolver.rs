use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::{split_archived_address, FetchMode, WaybackClient};
use crate::error::ArchiveError;

/// Archived bytes for one resource.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Capture timestamp actually served, which may differ from the one
    /// requested after archive redirects or an index fallback.
    pub timestamp: String,
    /// Final archive address the bytes came from.
    pub address: String,
}

impl Snapshot {
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

/// Result of a single archive request.
#[derive(Debug)]
pub enum FetchOutcome {
    Resolved(Snapshot),
    Redirect(Url),
    Failed(String),
}

/// Maps a canonical URL and a target time to archived bytes.
#[derive(Clone)]
pub struct SnapshotResolver {
    client: Arc<WaybackClient>,
    max_redirects: usize,
}

impl SnapshotResolver {
    #[must_use]
    pub fn new(client: Arc<WaybackClient>, max_redirects: usize) -> Self {
        Self {
            client,
            max_redirects,
        }
    }

    /// Fetch the capture of `url` at `timestamp`, falling back to the
    /// closest indexed capture when the direct address yields nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::SnapshotUnavailable`] when no usable capture
    /// exists, including an HTML page served where an image was expected,
    /// or [`ArchiveError::RateLimited`] if the archive keeps refusing.
    pub async fn resolve(
        &self,
        url: &Url,
        timestamp: &str,
        mode: FetchMode,
    ) -> Result<Snapshot, ArchiveError> {
        let snapshot = match self.follow(url, timestamp, mode).await {
            Ok(snapshot) => snapshot,
            Err(e @ ArchiveError::RateLimited { .. }) => return Err(e),
            Err(direct) => {
                debug!(url = %url, error = %direct, "Direct capture failed, consulting index");
                let closest = match self.client.closest_timestamp(url.as_str(), timestamp).await {
                    Ok(closest) => closest,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Closest-capture lookup failed");
                        None
                    }
                };
                match closest {
                    Some(closest) if closest != timestamp => {
                        debug!(url = %url, requested = %timestamp, closest = %closest, "Retrying at closest capture");
                        self.follow(url, &closest, mode).await?
                    }
                    _ => return Err(direct),
                }
            }
        };

        if mode == FetchMode::Image && snapshot.is_html() {
            return Err(ArchiveError::unavailable(
                url.as_str(),
                "archive served an HTML page in place of an image",
            ));
        }

        Ok(snapshot)
    }

    /// Request the capture address for `url` and chase redirects, at most
    /// `max_redirects` of them.
    ///
    /// Redirects to live URLs are mapped back into the archive at the same
    /// timestamp so that nothing is ever fetched from the live web.
    async fn follow(
        &self,
        url: &Url,
        timestamp: &str,
        mode: FetchMode,
    ) -> Result<Snapshot, ArchiveError> {
        let mut address = self.client.archived_address(timestamp, mode, url.as_str());
        let mut redirects_left = self.max_redirects;

        loop {
            match self.fetch_once(&address, timestamp).await? {
                FetchOutcome::Resolved(snapshot) => return Ok(snapshot),
                FetchOutcome::Failed(reason) => {
                    return Err(ArchiveError::unavailable(url.as_str(), reason));
                }
                FetchOutcome::Redirect(next) => {
                    if redirects_left == 0 {
                        return Err(ArchiveError::unavailable(
                            url.as_str(),
                            format!("more than {} redirects", self.max_redirects),
                        ));
                    }
                    redirects_left -= 1;

                    address = if self.client.is_archived_address(&next) {
                        next.to_string()
                    } else {
                        debug!(url = %url, target = %next, "Redirect left the archive, mapping back");
                        self.client.archived_address(timestamp, mode, next.as_str())
                    };
                }
            }
        }
    }

    async fn fetch_once(&self, address: &str, timestamp: &str) -> Result<FetchOutcome, ArchiveError> {
        let response = match self.client.get(address).await {
            Ok(response) => response,
            Err(ArchiveError::TransportFailure { url, source }) => {
                return Ok(FetchOutcome::Failed(format!(
                    "transport failure at {url}: {source}"
                )));
            }
            Err(e) => return Err(e),
        };

        if response.status.is_redirection() {
            let Some(location) = response.location else {
                return Ok(FetchOutcome::Failed(format!(
                    "HTTP {} without a Location header",
                    response.status
                )));
            };
            let next = Url::parse(address)
                .and_then(|current| current.join(&location))
                .map_err(|e| {
                    ArchiveError::unavailable(address, format!("bad redirect target {location}: {e}"))
                })?;
            return Ok(FetchOutcome::Redirect(next));
        }

        if response.status != StatusCode::OK {
            return Ok(FetchOutcome::Failed(format!("HTTP {}", response.status)));
        }
        if response.body.is_empty() {
            return Ok(FetchOutcome::Failed("empty body".to_string()));
        }

        let served_timestamp = Url::parse(address)
            .ok()
            .and_then(|u| split_archived_address(&u[url::Position::BeforePath..]))
            .map_or_else(|| timestamp.to_string(), |(ts, _)| ts);

        Ok(FetchOutcome::Resolved(Snapshot {
            bytes: response.body,
            content_type: response.content_type,
            timestamp: served_timestamp,
            address: address.to_string(),
        }))
    }
}
