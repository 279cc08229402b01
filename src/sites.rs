//! Era definitions: which URL space to search and how to bucket what is
//! found.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::store::safe_join;

#[derive(Debug, Error)]
pub enum SitesError {
    #[error("failed to read sites file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse sites file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid sites file: {0}")]
    Invalid(String),
}

/// Contents of the sites file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sites {
    #[serde(rename = "era", default)]
    pub eras: Vec<Era>,
}

/// One historical period or hosting platform of the site.
#[derive(Debug, Clone, Deserialize)]
pub struct Era {
    /// Directory name under the data root.
    pub name: String,
    /// CDX URL pattern, e.g. `geocities.com/Area51/1234/*`.
    pub url_pattern: String,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    #[serde(default = "default_category")]
    pub default_category: String,
    /// Category name to URL path keywords, checked in name order.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

fn default_category() -> String {
    "pages".to_string()
}

impl Sites {
    /// Load and validate a sites file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, not valid TOML, or
    /// describes eras that cannot be laid out on disk.
    pub fn load(path: &Path) -> Result<Self, SitesError> {
        let text = std::fs::read_to_string(path).map_err(|source| SitesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate sites TOML.
    ///
    /// # Errors
    ///
    /// See [`Sites::load`].
    pub fn parse(text: &str) -> Result<Self, SitesError> {
        let sites: Self = toml::from_str(text)?;
        sites.validate()?;
        Ok(sites)
    }

    fn validate(&self) -> Result<(), SitesError> {
        let mut names = HashSet::new();
        for era in &self.eras {
            if !names.insert(era.name.as_str()) {
                return Err(SitesError::Invalid(format!("duplicate era '{}'", era.name)));
            }
            if era.url_pattern.trim().is_empty() {
                return Err(SitesError::Invalid(format!(
                    "era '{}' has an empty url_pattern",
                    era.name
                )));
            }
            if let (Some(from), Some(to)) = (era.from_year, era.to_year) {
                if from > to {
                    return Err(SitesError::Invalid(format!(
                        "era '{}' has from_year {from} after to_year {to}",
                        era.name
                    )));
                }
            }

            let mut dirs = vec![era.name.as_str(), era.default_category.as_str()];
            dirs.extend(era.categories.keys().map(String::as_str));
            for dir in dirs {
                if safe_join(Path::new(""), &[dir]).is_err() {
                    return Err(SitesError::Invalid(format!(
                        "'{dir}' in era '{}' is not a plain directory name",
                        era.name
                    )));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn era(&self, name: &str) -> Option<&Era> {
        self.eras.iter().find(|e| e.name == name)
    }

    /// Eras matching an optional name filter.
    #[must_use]
    pub fn selected(&self, name: Option<&str>) -> Vec<&Era> {
        self.eras
            .iter()
            .filter(|e| name.is_none_or(|n| e.name == n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[era]]
name = "geocities"
url_pattern = "geocities.com/Area51/1234/*"
from_year = 1997
to_year = 2001

[era.categories]
photos = ["photo", "gallery"]
news = ["news"]

[[era]]
name = "own-domain"
url_pattern = "example-club.org/*"
default_category = "misc"
"#;

    #[test]
    fn test_parse_sites() {
        let sites = Sites::parse(SAMPLE).unwrap();
        assert_eq!(sites.eras.len(), 2);

        let geo = sites.era("geocities").unwrap();
        assert_eq!(geo.from_year, Some(1997));
        assert_eq!(geo.default_category, "pages");
        assert_eq!(geo.categories["photos"], vec!["photo", "gallery"]);

        let own = sites.era("own-domain").unwrap();
        assert_eq!(own.default_category, "misc");
        assert!(own.categories.is_empty());
    }

    #[test]
    fn test_selected() {
        let sites = Sites::parse(SAMPLE).unwrap();
        assert_eq!(sites.selected(None).len(), 2);
        assert_eq!(sites.selected(Some("geocities")).len(), 1);
        assert!(sites.selected(Some("missing")).is_empty());
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let text = r#"
[[era]]
name = "../escape"
url_pattern = "x.org/*"
"#;
        assert!(matches!(Sites::parse(text), Err(SitesError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_ranges() {
        let dup = r#"
[[era]]
name = "a"
url_pattern = "x.org/*"
[[era]]
name = "a"
url_pattern = "y.org/*"
"#;
        assert!(Sites::parse(dup).is_err());

        let range = r#"
[[era]]
name = "a"
url_pattern = "x.org/*"
from_year = 2005
to_year = 2001
"#;
        assert!(Sites::parse(range).is_err());
    }
}
