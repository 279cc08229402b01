//! Where a discovered capture goes on disk: its category directory and file
//! name.

use sha2::{Digest, Sha256};
use url::Url;

use crate::sites::Era;

/// Longest file stem kept, in bytes, leaving room for suffixes and the
/// extension under the usual 255-byte name limit.
const MAX_STEM_BYTES: usize = 120;

/// Hex characters of the query digest appended to file names.
const QUERY_HASH_LEN: usize = 8;

/// First category of `era` with a keyword found in the URL path or the
/// MIME type, else the era's default.
#[must_use]
pub fn classify_category(url: &Url, mime: &str, era: &Era) -> String {
    let path = url.path().to_ascii_lowercase();
    let mime = mime.to_ascii_lowercase();

    era.categories
        .iter()
        .find(|(_, keywords)| {
            keywords.iter().any(|keyword| {
                let keyword = keyword.to_ascii_lowercase();
                !keyword.is_empty() && (path.contains(&keyword) || mime.contains(&keyword))
            })
        })
        .map_or_else(|| era.default_category.clone(), |(name, _)| name.clone())
}

/// Local file name for a capture of `url`.
///
/// Directory URLs become `index.html`; pages served as HTML without an
/// extension get `.html`; a query string adds a short digest so different
/// queries of one script never share a file.
#[must_use]
pub fn derive_filename(url: &Url, mime: &str) -> String {
    let segment = url
        .path_segments()
        .and_then(Iterator::last)
        .unwrap_or_default();
    let decoded =
        urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |s| s.into_owned());

    let mut name = if decoded.is_empty() {
        "index.html".to_string()
    } else {
        sanitize_filename(&decoded)
    };
    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = "index.html".to_string();
    }

    let (stem, ext) = split_extension(&name);
    let ext = if ext.is_empty() && mime.to_ascii_lowercase().contains("html") {
        ".html".to_string()
    } else {
        ext.to_string()
    };

    match url.query().filter(|q| !q.is_empty()) {
        Some(query) => {
            let digest = hex::encode(Sha256::digest(query.as_bytes()));
            format!("{stem}_{}{ext}", &digest[..QUERY_HASH_LEN])
        }
        None => format!("{stem}{ext}"),
    }
}

/// Make a URL path segment safe to use as a file name.
///
/// Spaces and URL punctuation become underscores, runs of underscores
/// collapse, and the stem is truncated on a character boundary.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let (name, ext) = split_extension(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '(' | ')' | '[' | ']' | '-' | '_' | '.' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();
    let sanitized = sanitized
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let end = sanitized
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= MAX_STEM_BYTES)
        .last()
        .unwrap_or(0);
    let truncated = &sanitized[..end];

    let ext: String = ext
        .chars()
        .filter(|c| *c == '.' || c.is_ascii_alphanumeric())
        .collect();
    format!("{truncated}{}", ext.to_ascii_lowercase())
}

/// `("name", ".ext")`, or `(name, "")` without a usable extension.
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(dot) if dot > 0 && filename.len() - dot <= 6 => filename.split_at(dot),
        _ => (filename, ""),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn era() -> Era {
        let mut categories = BTreeMap::new();
        categories.insert("documents".to_string(), vec!["application/pdf".to_string()]);
        categories.insert(
            "photos".to_string(),
            vec!["photo".to_string(), "gallery".to_string()],
        );
        Era {
            name: "geocities".to_string(),
            url_pattern: "geocities.com/club/*".to_string(),
            from_year: None,
            to_year: None,
            default_category: "pages".to_string(),
            categories,
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_classify_category() {
        let era = era();
        assert_eq!(
            classify_category(&url("http://g.com/club/Gallery/trip.html"), "text/html", &era),
            "photos"
        );
        assert_eq!(
            classify_category(&url("http://g.com/club/minutes"), "application/pdf", &era),
            "documents"
        );
        assert_eq!(
            classify_category(&url("http://g.com/club/news.html"), "text/html", &era),
            "pages"
        );
    }

    #[test]
    fn test_derive_filename() {
        assert_eq!(derive_filename(&url("http://g.com/club/"), "text/html"), "index.html");
        assert_eq!(derive_filename(&url("http://g.com/"), "text/html"), "index.html");
        assert_eq!(
            derive_filename(&url("http://g.com/club/My%20Page.HTM"), "text/html"),
            "My_Page.htm"
        );
        assert_eq!(derive_filename(&url("http://g.com/club/about"), "text/html"), "about.html");
        assert_eq!(
            derive_filename(&url("http://g.com/club/report"), "application/pdf"),
            "report"
        );
    }

    #[test]
    fn test_query_variants_get_distinct_names() {
        let a = derive_filename(&url("http://g.com/news.php?id=1"), "text/html");
        let b = derive_filename(&url("http://g.com/news.php?id=2"), "text/html");
        assert_ne!(a, b);
        assert!(a.starts_with("news_") && a.ends_with(".php"));
        assert_eq!(a.len(), "news_".len() + QUERY_HASH_LEN + ".php".len());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Video File.mp4"), "My_Video_File.mp4");
        assert_eq!(sanitize_filename("Let's talk #club.html"), "Let_s_talk_club.html");
        assert_eq!(sanitize_filename("a:b|c*d.gif"), "a_b_c_d.gif");
        assert!(sanitize_filename(&"x".repeat(500)).len() <= MAX_STEM_BYTES);
    }

    #[test]
    fn test_multibyte_stem_capped_in_bytes() {
        let name = sanitize_filename(&format!("{}.html", "写真".repeat(100)));
        let stem = name.strip_suffix(".html").unwrap();
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert_eq!(stem.len() % 3, 0);
        assert!(stem.chars().all(|c| c == '写' || c == '真'));
    }
}
