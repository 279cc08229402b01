//! Content-addressed, write-once storage for shared page assets.
//!
//! Every asset lives at `{data_root}/{era}/assets/{hash}.{ext}`, where the
//! hash is derived from the asset's canonical URL. The same URL therefore
//! always lands on the same file, and a file that exists and is non-empty
//! is never fetched or written again.

use std::path::{Component, Path, PathBuf};

use mime_guess::mime;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::constants::{ASSETS_DIR_NAME, DOCUMENT_DEPTH};
use crate::error::ArchiveError;
use crate::rewriter::ReferenceKind;

/// Hex characters of the URL digest kept in file names.
const NAME_HASH_LEN: usize = 32;

/// Longest URL suffix accepted as a file extension.
const MAX_EXTENSION_LEN: usize = 5;

/// An asset available in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub canonical_url: String,
    /// Capture the bytes came from; unknown for assets stored by an earlier
    /// run.
    pub timestamp: Option<String>,
    pub local_file_name: String,
    pub byte_length: u64,
}

/// Asset directory for one era.
#[derive(Debug, Clone)]
pub struct AssetStore {
    assets_dir: PathBuf,
}

impl AssetStore {
    /// Store rooted at `{data_root}/{era}/assets`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsafePath`] if `era` is not a plain
    /// directory name.
    pub fn for_era(data_root: &Path, era: &str) -> Result<Self, ArchiveError> {
        Ok(Self {
            assets_dir: safe_join(data_root, &[era, ASSETS_DIR_NAME])?,
        })
    }

    /// Deterministic file name for `canonical`.
    #[must_use]
    pub fn file_name_for(canonical: &Url, kind: ReferenceKind) -> String {
        let digest = hex::encode(Sha256::digest(canonical.as_str().as_bytes()));
        format!("{}.{}", &digest[..NAME_HASH_LEN], extension_for(canonical, kind))
    }

    /// Absolute path of `file_name` inside the store.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsafePath`] unless `file_name` is a single
    /// plain path component.
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, ArchiveError> {
        safe_join(&self.assets_dir, &[file_name])
    }

    /// The stored asset for `canonical`, if present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error only if the destination is unsafe.
    pub async fn existing(
        &self,
        canonical: &Url,
        kind: ReferenceKind,
    ) -> Result<Option<ResolvedAsset>, ArchiveError> {
        let file_name = Self::file_name_for(canonical, kind);
        let path = self.path_for(&file_name)?;

        Ok(non_empty_len(&path).await.map(|len| ResolvedAsset {
            canonical_url: canonical.to_string(),
            timestamp: None,
            local_file_name: file_name,
            byte_length: len,
        }))
    }

    /// Persist `bytes` as the asset for `canonical`.
    ///
    /// An existing non-empty file is kept as-is. Writes go through a
    /// temporary sibling and a rename so readers never see partial files;
    /// two tasks storing the same asset at once both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsafePath`] or [`ArchiveError::Io`].
    pub async fn store(
        &self,
        canonical: &Url,
        timestamp: &str,
        bytes: &[u8],
        kind: ReferenceKind,
    ) -> Result<ResolvedAsset, ArchiveError> {
        let file_name = Self::file_name_for(canonical, kind);
        let path = self.path_for(&file_name)?;

        let byte_length = if let Some(len) = non_empty_len(&path).await {
            debug!(url = %canonical, file = %file_name, "Asset already stored");
            len
        } else {
            write_atomic(&path, bytes).await?;
            debug!(url = %canonical, file = %file_name, bytes = bytes.len(), "Asset stored");
            bytes.len() as u64
        };

        Ok(ResolvedAsset {
            canonical_url: canonical.to_string(),
            timestamp: Some(timestamp.to_string()),
            local_file_name: file_name,
            byte_length,
        })
    }
}

/// Relative prefix from a document's directory to its era's asset
/// directory, e.g. `../../assets/`.
#[must_use]
pub fn local_asset_prefix() -> String {
    format!("{}{ASSETS_DIR_NAME}/", "../".repeat(DOCUMENT_DEPTH))
}

/// Join `components` onto `root`, refusing anything that could leave it.
///
/// Each component must be one ordinary path segment: no separators, no
/// `.`/`..`, no roots or prefixes.
///
/// # Errors
///
/// Returns [`ArchiveError::UnsafePath`] naming the offending path.
pub fn safe_join(root: &Path, components: &[&str]) -> Result<PathBuf, ArchiveError> {
    let mut path = root.to_path_buf();
    for component in components {
        let mut parts = Path::new(component).components();
        let plain = matches!(
            (parts.next(), parts.next()),
            (Some(Component::Normal(_)), None)
        ) && !component.contains(['/', '\\', '\0']);

        if !plain {
            return Err(ArchiveError::UnsafePath {
                path: root.join(components.join("/")),
            });
        }
        path.push(component);
    }
    Ok(path)
}

/// Write `bytes` to `path` via a temporary file in the same directory.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if the directory or file cannot be written.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArchiveError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{:08x}.part", rand::random::<u32>()));

    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| ArchiveError::io(&temp, e))?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(ArchiveError::io(path, e));
    }
    Ok(())
}

/// Length of the file at `path` when it exists and is non-empty.
pub async fn non_empty_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}

/// Extension taken from the URL when it is short, known, and fits the kind;
/// otherwise the kind's default.
fn extension_for(canonical: &Url, kind: ReferenceKind) -> String {
    let segment = canonical
        .path_segments()
        .and_then(Iterator::last)
        .unwrap_or_default();

    segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| plausible_extension(ext, kind))
        .unwrap_or_else(|| kind.default_extension().to_string())
}

fn plausible_extension(ext: &str, kind: ReferenceKind) -> bool {
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return false;
    }
    let Some(guess) = mime_guess::from_ext(ext).first() else {
        return false;
    };

    match kind {
        ReferenceKind::Image => guess.type_() == mime::IMAGE,
        ReferenceKind::Stylesheet => guess == mime::TEXT_CSS,
        ReferenceKind::Script => guess.subtype() == mime::JAVASCRIPT,
        ReferenceKind::Attachment => true,
    }
}
