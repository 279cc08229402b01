//! Wayback Machine access: address formats, transport with retry, and
//! snapshot resolution.

mod backoff;
pub mod cdx;
mod resolver;

use anyhow::{Context, Result};
use reqwest::header::{HeaderName, CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

pub use backoff::RetryPolicy;
pub use cdx::CdxRow;
pub use resolver::{FetchOutcome, Snapshot, SnapshotResolver};

use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;
use crate::error::ArchiveError;

/// Archive access mode, encoded as a suffix on the capture timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// `id_`: the original bytes, untouched by the archive.
    Identity,
    /// `im_`: image mode; the archive may serve a transformed variant.
    Image,
}

impl FetchMode {
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            Self::Identity => "id_",
            Self::Image => "im_",
        }
    }
}

/// A raw archive response with redirects left unfollowed.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP client for the archive.
///
/// Never follows redirects on its own; callers decide whether a redirect
/// stays inside the archive.
pub struct WaybackClient {
    client: Client,
    base: Url,
    retry: RetryPolicy,
}

impl WaybackClient {
    /// Create a client for the archive configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(config.archive_base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid archive base URL: {}", config.archive_base_url))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base,
            retry: config.retry_policy(),
        })
    }

    /// Archive base without a trailing slash.
    #[must_use]
    pub fn base(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// `{base}/web/{timestamp}{mode}/{original}`.
    #[must_use]
    pub fn archived_address(&self, timestamp: &str, mode: FetchMode, original: &str) -> String {
        format!("{}/web/{timestamp}{}/{original}", self.base(), mode.flag())
    }

    /// Whether `url` is a capture address on this archive, over either
    /// scheme.
    #[must_use]
    pub fn is_archived_address(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str() == self.base.host_str()
            && split_archived_address(&url[url::Position::BeforePath..]).is_some()
    }

    /// GET `address`, retrying 429s with backoff and network errors with a
    /// fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::RateLimited`] or
    /// [`ArchiveError::TransportFailure`] once retries are exhausted.
    pub async fn get(&self, address: &str) -> Result<RawResponse, ArchiveError> {
        let mut rate_attempt = 0;
        let mut transport_attempt = 0;

        loop {
            match self.send_once(address).await {
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                    if rate_attempt >= self.retry.rate_limit_retries {
                        warn!(url = %address, attempts = rate_attempt, "Archive rate limit persisted, giving up");
                        return Err(ArchiveError::RateLimited {
                            url: address.to_string(),
                        });
                    }
                    let delay = self.retry.backoff_delay(rate_attempt);
                    warn!(url = %address, delay_ms = delay.as_millis(), "Archive rate limited, backing off");
                    sleep(delay).await;
                    rate_attempt += 1;
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if transport_attempt >= self.retry.transport_retries {
                        return Err(ArchiveError::TransportFailure {
                            url: address.to_string(),
                            source: e,
                        });
                    }
                    debug!(url = %address, error = %e, "Archive request failed, retrying");
                    sleep(self.retry.transport_delay).await;
                    transport_attempt += 1;
                }
            }
        }
    }

    async fn send_once(&self, address: &str) -> Result<RawResponse, reqwest::Error> {
        let response = self.client.get(address).send().await?;
        let status = response.status();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let location = header(LOCATION);
        let content_type = header(CONTENT_TYPE);
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            location,
            content_type,
            body,
        })
    }

    /// Timestamp of the status-200 capture of `url` closest to `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be reached.
    pub async fn closest_timestamp(
        &self,
        url: &str,
        timestamp: &str,
    ) -> Result<Option<String>, ArchiveError> {
        let address = cdx::closest_address(self.base(), url, timestamp);
        let response = self.get(&address).await?;
        if !response.status.is_success() {
            debug!(url = %url, status = %response.status, "Closest-capture lookup failed");
            return Ok(None);
        }
        Ok(cdx::parse_closest(&String::from_utf8_lossy(&response.body)))
    }

    /// Search the index for status-200 captures matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be reached or answers with
    /// something other than a CDX table.
    pub async fn search(
        &self,
        pattern: &str,
        from_year: Option<i32>,
        to_year: Option<i32>,
    ) -> Result<Vec<CdxRow>> {
        let address = cdx::search_address(self.base(), pattern, from_year, to_year);
        let response = self
            .get(&address)
            .await
            .with_context(|| format!("CDX search failed for {pattern}"))?;
        if !response.status.is_success() {
            anyhow::bail!("CDX search for {pattern} returned {}", response.status);
        }
        cdx::parse_search(&String::from_utf8_lossy(&response.body))
            .with_context(|| format!("Failed to parse CDX response for {pattern}"))
    }
}

/// Split the path of a capture address (`/web/{ts}[mode]/{original}`) into
/// its timestamp and captured URL.
#[must_use]
pub fn split_archived_address(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("/web/")?;
    let (stamp, original) = rest.split_once('/')?;

    let digits_end = stamp
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(stamp.len());
    let (timestamp, flag) = stamp.split_at(digits_end);
    if timestamp.is_empty() || !(flag.is_empty() || (flag.len() == 3 && flag.ends_with('_'))) {
        return None;
    }

    let lower = original.to_ascii_lowercase();
    // Some proxies collapse the double slash inside the path.
    let original = if lower.starts_with("http://") || lower.starts_with("https://") {
        original.to_string()
    } else if lower.starts_with("https:/") {
        format!("https://{}", &original[7..])
    } else if lower.starts_with("http:/") {
        format!("http://{}", &original[6..])
    } else {
        return None;
    };

    Some((timestamp.to_string(), original))
}
