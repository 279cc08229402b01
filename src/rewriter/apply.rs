use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::bytes::Regex;

use super::references::classify;

// Byte-oriented (`-u`) so documents in legacy encodings pass through intact.
// Quoted values are consumed whole, so a `>` inside one does not end the tag.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i-u)<([a-z][a-z0-9]*)((?:[\s/]*[^\s/>="']+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+))?)*)[\s/]*>"#,
    )
    .expect("Invalid tag regex")
});

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .expect("Invalid attribute regex")
});

struct Attribute {
    name: String,
    value: String,
    span: Range<usize>,
}

/// Replace the values of classified reference attributes whose decoded
/// value is a key of `replacements`.
///
/// Everything outside the replaced values is copied byte for byte. Returns
/// the new document and the number of attribute values replaced.
#[must_use]
pub fn apply_rewrites(html: &[u8], replacements: &HashMap<String, String>) -> (Vec<u8>, usize) {
    if replacements.is_empty() {
        return (html.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(html.len());
    let mut last = 0;
    let mut count = 0;

    for tag in TAG.captures_iter(html) {
        let Some(body) = tag.get(2) else {
            continue;
        };
        let name = String::from_utf8_lossy(&tag[1]);
        let attributes = parse_attributes(body.as_bytes(), body.start());

        let lookup = |wanted: &str| {
            attributes
                .iter()
                .find(|a| a.name == wanted)
                .map(|a| a.value.as_str())
        };
        let Some(site) = classify(&name, lookup) else {
            continue;
        };
        let Some(attribute) = attributes.iter().find(|a| a.name == site.attribute) else {
            continue;
        };
        let Some(replacement) = replacements.get(&attribute.value) else {
            continue;
        };

        out.extend_from_slice(&html[last..attribute.span.start]);
        out.extend_from_slice(replacement.as_bytes());
        last = attribute.span.end;
        count += 1;
    }

    out.extend_from_slice(&html[last..]);
    (out, count)
}

fn parse_attributes(body: &[u8], offset: usize) -> Vec<Attribute> {
    ATTR.captures_iter(body)
        .filter_map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
            Some(Attribute {
                name: String::from_utf8_lossy(&caps[1]).to_ascii_lowercase(),
                value: decode_entities(&String::from_utf8_lossy(value.as_bytes())),
                span: offset + value.start()..offset + value.end(),
            })
        })
        .collect()
}

/// Decode the character references that commonly appear in URLs.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            }?;
            Some((ch, semi + 1))
        });

        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacements(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_rewrites_only_matching_sites() {
        let html = br#"<img src="a.gif" alt="a.gif"><a href="a.gif">a.gif</a><IMG SRC='b.gif'>"#;
        let map = replacements(&[("a.gif", "L/a.gif"), ("b.gif", "L/b.gif")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<img src="L/a.gif" alt="a.gif"><a href="a.gif">a.gif</a><IMG SRC='L/b.gif'>"#
        );
    }

    #[test]
    fn test_unquoted_and_entity_values() {
        let html = br#"<img src=x.gif><img src="p.php?a=1&amp;b=2">"#;
        let map = replacements(&[("x.gif", "L/1.gif"), ("p.php?a=1&b=2", "L/2.jpg")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 2);
        assert_eq!(out, br#"<img src=L/1.gif><img src="L/2.jpg">"#.to_vec());
    }

    #[test]
    fn test_stylesheet_needs_rel_or_type() {
        let html = br#"<link rel="icon" href="s.css"><link rel="stylesheet" href="s.css">"#;
        let map = replacements(&[("s.css", "L/s.css")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 1);
        assert_eq!(
            out,
            br#"<link rel="icon" href="s.css"><link rel="stylesheet" href="L/s.css">"#.to_vec()
        );
    }

    #[test]
    fn test_non_utf8_bytes_preserved() {
        let html = b"<p>caf\xe9</p><img src=\"x.gif\"><p>\xff</p>";
        let map = replacements(&[("x.gif", "L/x.gif")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 1);
        assert_eq!(out, b"<p>caf\xe9</p><img src=\"L/x.gif\"><p>\xff</p>".to_vec());
    }

    #[test]
    fn test_gt_inside_quoted_value() {
        let html = br#"<a title="Next >>" href="r.pdf">r</a><img alt='a > b' src=n.gif />"#;
        let map = replacements(&[("r.pdf", "L/r.pdf"), ("n.gif", "L/n.gif")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 2);
        assert_eq!(
            out,
            br#"<a title="Next >>" href="L/r.pdf">r</a><img alt='a > b' src=L/n.gif />"#.to_vec()
        );
    }

    #[test]
    fn test_attributes_without_separating_space() {
        let html = br#"<img alt="x"src="a.gif">"#;
        let map = replacements(&[("a.gif", "L/a.gif")]);
        let (out, count) = apply_rewrites(html, &map);
        assert_eq!(count, 1);
        assert_eq!(out, br#"<img alt="x"src="L/a.gif">"#.to_vec());
    }

    #[test]
    fn test_no_replacements_is_identity() {
        let html = b"<img src=\"x.gif\">".to_vec();
        let (out, count) = apply_rewrites(&html, &HashMap::new());
        assert_eq!(out, html);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a&amp;b&#38;c&#x26;d"), "a&b&c&d");
        assert_eq!(decode_entities("x&y=1"), "x&y=1");
        assert_eq!(decode_entities("&bogus;"), "&bogus;");
    }
}
