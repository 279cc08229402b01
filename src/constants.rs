//! Shared constants used across the application.

/// User agent string used for archive requests.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default archive host.
pub const DEFAULT_ARCHIVE_BASE: &str = "https://web.archive.org";

/// Name of the shared per-era asset directory.
pub const ASSETS_DIR_NAME: &str = "assets";

/// Number of directory levels between an era directory and a document
/// (`{era}/{year}/{category}/{file}`).
pub const DOCUMENT_DEPTH: usize = 2;

/// Extensions of linked files that are archived alongside the page that
/// links to them.
pub const ATTACHMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pps", "pptx", "rtf", "txt", "zip", "rar", "gz",
    "tar", "ps", "mp3", "wav", "mid", "midi", "avi", "mov", "mpg", "mpeg", "wmv", "swf",
];
