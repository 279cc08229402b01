//! CDX index queries: closest-capture lookup and capture search.

use serde_json::Value;

/// One capture row returned by a CDX search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxRow {
    pub original: String,
    pub timestamp: String,
    pub mimetype: String,
    pub digest: String,
    pub statuscode: String,
}

/// Address of the closest-capture lookup for `url` around `timestamp`.
#[must_use]
pub fn closest_address(base: &str, url: &str, timestamp: &str) -> String {
    format!(
        "{base}/cdx/search/cdx?url={}&output=json&limit=1&closest={timestamp}&filter=statuscode:200",
        urlencoding::encode(url)
    )
}

/// Address of a capture search for `pattern`, optionally bounded by year.
#[must_use]
pub fn search_address(
    base: &str,
    pattern: &str,
    from_year: Option<i32>,
    to_year: Option<i32>,
) -> String {
    let mut address = format!(
        "{base}/cdx/search/cdx?url={}&output=json&fl=original,timestamp,mimetype,digest,statuscode&filter=statuscode:200&collapse=digest",
        urlencoding::encode(pattern)
    );
    if let Some(from) = from_year {
        address.push_str(&format!("&from={from}"));
    }
    if let Some(to) = to_year {
        address.push_str(&format!("&to={to}"));
    }
    address
}

/// Extract the timestamp of the first capture in a closest-lookup response.
///
/// An empty body, an empty array or a header-only array all mean "no
/// capture".
#[must_use]
pub fn parse_closest(body: &str) -> Option<String> {
    let rows = parse_table(body)?;
    let (header, data) = rows.split_first()?;
    let column = column_index(header, "timestamp").unwrap_or(1);
    data.first()?.get(column).cloned()
}

/// Parse a search response into rows, keyed by its header row.
///
/// # Errors
///
/// Returns an error if the body is neither empty nor a JSON table.
pub fn parse_search(body: &str) -> Result<Vec<CdxRow>, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body)?;
    let Some(rows) = table_from_value(&value) else {
        return Ok(Vec::new());
    };
    let Some((header, data)) = rows.split_first() else {
        return Ok(Vec::new());
    };

    let col = |name: &str, fallback: usize| column_index(header, name).unwrap_or(fallback);
    let (original, timestamp, mimetype, digest, statuscode) = (
        col("original", 0),
        col("timestamp", 1),
        col("mimetype", 2),
        col("digest", 3),
        col("statuscode", 4),
    );

    Ok(data
        .iter()
        .filter_map(|row| {
            Some(CdxRow {
                original: row.get(original)?.clone(),
                timestamp: row.get(timestamp)?.clone(),
                mimetype: row.get(mimetype).cloned().unwrap_or_default(),
                digest: row.get(digest).cloned().unwrap_or_default(),
                statuscode: row.get(statuscode).cloned().unwrap_or_default(),
            })
        })
        .collect())
}

fn parse_table(body: &str) -> Option<Vec<Vec<String>>> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    table_from_value(&value)
}

fn table_from_value(value: &Value) -> Option<Vec<Vec<String>>> {
    value
        .as_array()?
        .iter()
        .map(|row| {
            row.as_array().map(|cells| {
                cells
                    .iter()
                    .map(|c| c.as_str().map_or_else(|| c.to_string(), String::from))
                    .collect()
            })
        })
        .collect()
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_address_format() {
        assert_eq!(
            closest_address("https://web.archive.org", "http://site.org/a b.gif", "20010101000000"),
            "https://web.archive.org/cdx/search/cdx?url=http%3A%2F%2Fsite.org%2Fa%20b.gif&output=json&limit=1&closest=20010101000000&filter=statuscode:200"
        );
    }

    #[test]
    fn test_search_address_with_years() {
        let address = search_address("https://web.archive.org", "site.org/*", Some(1999), Some(2003));
        assert!(address.starts_with(
            "https://web.archive.org/cdx/search/cdx?url=site.org%2F%2A&output=json&fl=original,timestamp,mimetype,digest,statuscode"
        ));
        assert!(address.ends_with("&collapse=digest&from=1999&to=2003"));
    }

    #[test]
    fn test_parse_closest() {
        let body = r#"[["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
            ["org,site)/a.gif","20010304050607","http://site.org/a.gif","image/gif","200","ABC","123"]]"#;
        assert_eq!(parse_closest(body), Some("20010304050607".to_string()));
    }

    #[test]
    fn test_parse_closest_no_capture() {
        assert_eq!(parse_closest(""), None);
        assert_eq!(parse_closest("[]"), None);
        assert_eq!(parse_closest(r#"[["urlkey","timestamp"]]"#), None);
        assert_eq!(parse_closest("<html>error</html>"), None);
    }

    #[test]
    fn test_parse_search_uses_header_order() {
        let body = r#"[["timestamp","original","mimetype","digest","statuscode"],
            ["19990101000000","http://site.org/","text/html","D1","200"],
            ["20000101000000","http://site.org/a.html","text/html","D2","200"]]"#;
        let rows = parse_search(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].original, "http://site.org/a.html");
        assert_eq!(rows[1].timestamp, "20000101000000");
        assert_eq!(rows[0].digest, "D1");
    }

    #[test]
    fn test_parse_search_empty_and_invalid() {
        assert!(parse_search("").unwrap().is_empty());
        assert!(parse_search("[]").unwrap().is_empty());
        assert!(parse_search("not json").is_err());
    }
}
