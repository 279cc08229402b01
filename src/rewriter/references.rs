use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::ATTACHMENT_EXTENSIONS;
use crate::wayback::FetchMode;

/// What a reference site points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Image,
    Stylesheet,
    Script,
    Attachment,
}

impl ReferenceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Attachment => "attachment",
        }
    }

    /// Images go through the archive's image mode; everything else must come
    /// back byte-for-byte.
    #[must_use]
    pub fn fetch_mode(self) -> FetchMode {
        match self {
            Self::Image => FetchMode::Image,
            Self::Stylesheet | Self::Script | Self::Attachment => FetchMode::Identity,
        }
    }

    /// Extension used when the URL does not carry a plausible one.
    #[must_use]
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Stylesheet => "css",
            Self::Script => "js",
            Self::Attachment => "bin",
        }
    }
}

/// One reference found while scanning a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub document_url: Url,
    pub document_timestamp: String,
    /// Attribute value exactly as it appears in the document (entities
    /// decoded).
    pub raw: String,
    pub kind: ReferenceKind,
}

/// Which attribute of an element carries a reference, and of what kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSite {
    pub kind: ReferenceKind,
    pub attribute: &'static str,
}

/// Classify an element by tag name and attributes.
///
/// Stylesheets are recognised by `rel`/`type`, not by tag alone, so icons
/// and alternate links are ignored. Hyperlinks only count when they point
/// at a document file such as a PDF.
pub fn classify<'a>(tag: &str, attr: impl Fn(&str) -> Option<&'a str>) -> Option<ReferenceSite> {
    let tag = tag.to_ascii_lowercase();
    let site = |kind, attribute| Some(ReferenceSite { kind, attribute });

    let found = match tag.as_str() {
        "img" => site(ReferenceKind::Image, "src"),
        "input" if attr("type").is_some_and(|t| t.trim().eq_ignore_ascii_case("image")) => {
            site(ReferenceKind::Image, "src")
        }
        "body" | "table" | "td" | "th" => site(ReferenceKind::Image, "background"),
        "link" if is_stylesheet_link(attr("rel"), attr("type")) => {
            site(ReferenceKind::Stylesheet, "href")
        }
        "script" => site(ReferenceKind::Script, "src"),
        "a" if attr("href").is_some_and(has_attachment_extension) => {
            site(ReferenceKind::Attachment, "href")
        }
        _ => None,
    }?;

    attr(found.attribute).map(|_| found)
}

fn is_stylesheet_link(rel: Option<&str>, mime: Option<&str>) -> bool {
    let by_rel = rel.is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
    });
    let by_type = mime.is_some_and(|t| t.trim().eq_ignore_ascii_case("text/css"));
    by_rel || by_type
}

/// Whether `href` names a file with one of the archived document
/// extensions.
#[must_use]
pub fn has_attachment_extension(href: &str) -> bool {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    segment.rsplit_once('.').is_some_and(|(_, ext)| {
        ATTACHMENT_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    })
}
