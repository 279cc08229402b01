//! Resolution of raw document references into canonical absolute URLs.

use url::Url;

use crate::error::ArchiveError;
use crate::wayback::split_archived_address;

/// Prefixes of references that never name a fetchable resource.
const SKIPPED_PREFIXES: &[&str] = &["data:", "#", "mailto:", "javascript:", "about:", "tel:"];

/// Resolve `raw` as it appears inside the document at `document_url`.
///
/// Root-relative references (`/x`) resolve against the site root of the
/// document's host; path-relative ones against the document's directory.
/// Absolute references that point into the archive itself are unwrapped to
/// the URL they capture.
///
/// # Errors
///
/// Returns [`ArchiveError::UnresolvableReference`] for empty strings,
/// non-fetchable schemes, and references that cannot be parsed.
pub fn resolve_reference(raw: &str, document_url: &Url) -> Result<Url, ArchiveError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ArchiveError::unresolvable(raw, "empty reference"));
    }

    let lower = trimmed.to_ascii_lowercase();
    if SKIPPED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Err(ArchiveError::unresolvable(raw, "non-fetchable scheme"));
    }

    let resolved = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(trimmed)
    } else if trimmed.starts_with("//") {
        document_url.join(trimmed)
    } else if trimmed.starts_with('/') {
        site_root(document_url).join(trimmed)
    } else {
        document_url.join(trimmed)
    }
    .map_err(|e| ArchiveError::unresolvable(raw, e.to_string()))?;

    let resolved = unwrap_archived(&resolved).unwrap_or(resolved);
    canonicalize(resolved).ok_or_else(|| ArchiveError::unresolvable(raw, "unsupported scheme"))
}

/// Canonical form used as an asset's identity: http(s) only, no default
/// port, no query, no fragment.
#[must_use]
pub fn canonicalize(url: Url) -> Option<Url> {
    let mut url = clean(url)?;
    url.set_query(None);
    Some(url)
}

/// Parse the address of a captured document. Like [`canonicalize`] but the
/// query is kept, since the index lists `page.php?id=1` and `page.php?id=2`
/// as separate captures.
#[must_use]
pub fn capture_url(url: &str) -> Option<Url> {
    let mut url = clean(Url::parse(url).ok()?)?;
    if url.query() == Some("") {
        url.set_query(None);
    }
    Some(url)
}

fn clean(mut url: Url) -> Option<Url> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;

    let default_port = match url.scheme() {
        "http" => 80,
        _ => 443,
    };
    if url.port() == Some(default_port) {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);
    Some(url)
}

fn site_root(document_url: &Url) -> Url {
    let mut root = document_url.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

/// If `url` is a Wayback capture address, return the captured URL.
fn unwrap_archived(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    if host != "archive.org" && !host.ends_with(".archive.org") {
        return None;
    }
    let (_, original) = split_archived_address(&url[url::Position::BeforePath..])?;
    Url::parse(&original).ok()
}
