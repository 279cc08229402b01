//! Wayback Site Restorer library.
//!
//! Rebuilds a vanished website from Wayback Machine captures: discovers
//! what the archive holds, downloads each page, and rewrites its images,
//! stylesheets, scripts and attachments to point at a shared local copy.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod normalize;
pub mod pipeline;
pub mod rewriter;
pub mod sites;
pub mod store;
pub mod wayback;
