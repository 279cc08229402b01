use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::references::{classify, ReferenceKind};

static CANDIDATES: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "img[src], input[src], link[href], script[src], a[href], \
         body[background], table[background], td[background], th[background]",
    )
    .expect("Invalid selector")
});

/// A distinct reference found in a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedReference {
    pub raw: String,
    pub kind: ReferenceKind,
}

/// Collect every reference site of interest in `html`.
///
/// Each raw string is reported once; when the same string appears under
/// several kinds the first occurrence wins. References already pointing at
/// `local_prefix` are left out.
#[must_use]
pub fn scan_references(html: &str, local_prefix: &str) -> Vec<ScannedReference> {
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for element in document.select(&CANDIDATES) {
        let el = element.value();
        let Some(site) = classify(el.name(), |name| el.attr(name)) else {
            continue;
        };
        let Some(raw) = el.attr(site.attribute) else {
            continue;
        };

        if raw.trim().is_empty() || raw.starts_with(local_prefix) {
            continue;
        }
        if !seen.insert(raw.to_string()) {
            continue;
        }

        references.push(ScannedReference {
            raw: raw.to_string(),
            kind: site.kind,
        });
    }

    references
}
