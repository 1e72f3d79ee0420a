//! Archive writing and filesystem helpers.
//!
//! - [`ArchiveWriter`] - writes an ordered list of [`ContentSource`]s into one
//!   zip-format archive and reports how many bytes each source contributed
//! - [`zip`] - the deterministic zip implementation
//! - [`filesystem`] - directory copying, atomic moves, checksums
//!
//! Writers must be reproducible: the same sources always give the same bytes.
//! Entries are taken in source order, directories are walked sorted, and the
//! first entry with a given name wins.

pub mod filesystem;
pub mod zip;

pub use self::zip::ZipArchiveWriter;

use std::path::{Path, PathBuf};

use anyhow::Result;
use bytes::Bytes;

/// Which entries of a nested archive are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryFilter {
    #[default]
    All,
    /// Drop signature files and the jar index, which become invalid once
    /// entries of several libraries are mixed in one archive.
    DropSignatures,
}

impl EntryFilter {
    pub fn accepts(self, name: &str) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::DropSignatures => {
                let Some(file) = name.strip_prefix("META-INF/") else {
                    return true;
                };
                if file.contains('/') {
                    return true;
                }
                let upper = file.to_ascii_uppercase();
                !(upper == "INDEX.LIST"
                    || upper.ends_with(".SF")
                    || upper.ends_with(".DSA")
                    || upper.ends_with(".RSA"))
            }
        }
    }
}

/// Whether `relative` (slash-separated, relative to a module output) is
/// matched by one of `excludes`. `*` never crosses a directory.
pub fn is_excluded(relative: &str, excludes: &[glob::Pattern]) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    excludes.iter().any(|p| p.matches_with(relative, options))
}

/// One ordered input of an archive.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Every file under `root`, entry names prefixed with `prefix`.
    Directory {
        root: PathBuf,
        prefix: String,
        excludes: Vec<glob::Pattern>,
    },
    /// A single file stored under `entry`.
    File { path: PathBuf, entry: String },
    /// In-memory content stored under `entry`.
    Bytes { entry: String, data: Bytes },
    /// The entries of another zip archive, copied flat.
    Archive { path: PathBuf, filter: EntryFilter },
}

impl ContentSource {
    pub fn directory(root: impl Into<PathBuf>) -> Self {
        ContentSource::Directory {
            root: root.into(),
            prefix: String::new(),
            excludes: Vec::new(),
        }
    }

    /// Content of a library file: a class directory is walked, anything
    /// else is read as a zip archive.
    pub fn library_file(path: &Path, filter: EntryFilter) -> Self {
        if path.is_dir() {
            ContentSource::directory(path)
        } else {
            ContentSource::Archive {
                path: path.to_path_buf(),
                filter,
            }
        }
    }
}

/// Writes archives from ordered content sources.
pub trait ArchiveWriter: Send + Sync {
    /// Write `sources` into the archive at `target`, replacing it.
    ///
    /// Returns the uncompressed bytes written for each source, in source
    /// order. A source whose entries were all shadowed reports 0.
    fn write(&self, target: &Path, sources: &[ContentSource], compress: bool) -> Result<Vec<u64>>;
}
