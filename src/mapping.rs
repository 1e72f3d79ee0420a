//! Structure mapping: which module or library produced which archive bytes.
//!
//! Every packed unit appends its entries once it is finished. The aggregate
//! is shared by all concurrently packed units of a build, and is serialized
//! as the `content-mapping.json` report plus a plain-text summary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;

/// Kind of contributor behind a structure mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContributorKind {
    ModuleOutput,
    ModuleTestOutput,
    ProjectLibraryFile,
    ModuleLibraryFile,
}

/// One contributor of one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub archive_path: PathBuf,
    pub contributor_kind: ContributorKind,
    /// Module name, or library name for library contributors.
    pub contributor_name: String,
    /// Module declaring a module-scoped library.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owning_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub byte_size: u64,
}

impl MappingEntry {
    pub fn module_output(archive: impl Into<PathBuf>, module: impl Into<String>, size: u64) -> Self {
        Self {
            archive_path: archive.into(),
            contributor_kind: ContributorKind::ModuleOutput,
            contributor_name: module.into(),
            owning_module: None,
            library_file: None,
            reason: None,
            byte_size: size,
        }
    }

    /// Test output packaged by an artifact; never measured.
    pub fn module_test_output(archive: impl Into<PathBuf>, module: impl Into<String>) -> Self {
        Self {
            contributor_kind: ContributorKind::ModuleTestOutput,
            ..Self::module_output(archive, module, 0)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Human-readable contributor identity, e.g. `gson (module core)`.
    pub fn contributor_label(&self) -> String {
        match &self.owning_module {
            Some(module) => format!("{} (module {})", self.contributor_name, module),
            None => self.contributor_name.clone(),
        }
    }
}

/// Append-only, thread-safe list of mapping entries for one build.
#[derive(Debug, Default)]
pub struct StructureMapping {
    entries: Mutex<Vec<MappingEntry>>,
}

impl StructureMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append all entries of one unit in a single step, so entries of one
    /// unit stay contiguous.
    pub fn extend(&self, entries: impl IntoIterator<Item = MappingEntry>) {
        self.entries.lock().extend(entries);
    }

    pub fn push(&self, entry: MappingEntry) {
        self.entries.lock().push(entry);
    }

    /// Order entries by archive path. Entries of one archive keep their
    /// relative order.
    pub fn sort_by_archive(&self) {
        self.entries
            .lock()
            .sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of all entries in append order.
    pub fn entries(&self) -> Vec<MappingEntry> {
        self.entries.lock().clone()
    }

    pub fn into_entries(self) -> Vec<MappingEntry> {
        self.entries.into_inner()
    }

    /// Names of all modules contributing compiled output.
    pub fn included_modules(&self) -> BTreeSet<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.contributor_kind == ContributorKind::ModuleOutput)
            .map(|e| e.contributor_name.clone())
            .collect()
    }

    /// Plain-text listing: every archive with its total size and contributors.
    pub fn summary(&self) -> String {
        let entries = self.entries.lock();
        let mut by_archive: BTreeMap<&Path, Vec<&MappingEntry>> = BTreeMap::new();
        for entry in entries.iter() {
            by_archive
                .entry(entry.archive_path.as_path())
                .or_default()
                .push(entry);
        }

        let mut out = String::new();
        for (archive, contributors) in by_archive {
            let total: u64 = contributors.iter().map(|e| e.byte_size).sum();
            let _ = writeln!(out, "{} ({} bytes)", archive.display(), total);
            for entry in contributors {
                let _ = write!(
                    out,
                    "  {:?} {} {}",
                    entry.contributor_kind,
                    entry.contributor_label(),
                    entry.byte_size
                );
                if let Some(reason) = &entry.reason {
                    let _ = write!(out, " [{reason}]");
                }
                out.push('\n');
            }
        }
        out
    }

    /// Write `content-mapping.json` and `content.txt` into `dir`.
    ///
    /// Archive paths under `base` are written relative to it.
    pub fn write_report(&self, dir: &Path, base: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating report directory '{}'", dir.display()))?;

        let entries: Vec<MappingEntry> = self
            .entries()
            .into_iter()
            .map(|mut entry| {
                if let Ok(rel) = entry.archive_path.strip_prefix(base) {
                    entry.archive_path = rel.to_path_buf();
                }
                entry
            })
            .collect();

        let json_path = dir.join("content-mapping.json");
        let json = serde_json::to_string_pretty(&entries)
            .context("serializing structure mapping")?;
        fs::write(&json_path, json)
            .with_context(|| format!("writing '{}'", json_path.display()))?;

        let summary = StructureMapping {
            entries: Mutex::new(entries),
        }
        .summary();
        let text_path = dir.join("content.txt");
        fs::write(&text_path, summary)
            .with_context(|| format!("writing '{}'", text_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library_entry() -> MappingEntry {
        MappingEntry {
            archive_path: PathBuf::from("/dist/lib/gson.jar"),
            contributor_kind: ContributorKind::ProjectLibraryFile,
            contributor_name: "gson".into(),
            owning_module: None,
            library_file: Some(PathBuf::from("/libs/gson-2.10.jar")),
            reason: None,
            byte_size: 42,
        }
    }

    #[test]
    fn test_included_modules_and_summary() {
        let mapping = StructureMapping::new();
        mapping.extend([
            MappingEntry::module_output("/dist/lib/app.jar", "core", 10),
            MappingEntry::module_output("/dist/lib/app.jar", "ui", 5),
            library_entry(),
        ]);

        assert_eq!(mapping.len(), 3);
        assert_eq!(
            mapping.included_modules().into_iter().collect::<Vec<_>>(),
            vec!["core", "ui"]
        );

        let summary = mapping.summary();
        assert!(summary.contains("/dist/lib/app.jar (15 bytes)"));
        assert!(summary.contains("ProjectLibraryFile gson 42"));
    }

    #[test]
    fn test_report_is_camel_case_json() {
        let temp = TempDir::new().unwrap();
        let mapping = StructureMapping::new();
        mapping.push(library_entry());
        mapping.push(
            MappingEntry::module_output("/dist/lib/app.jar", "core", 10).with_reason("resource"),
        );

        mapping
            .write_report(&temp.path().join("report"), Path::new("/dist"))
            .unwrap();

        let json = fs::read_to_string(temp.path().join("report/content-mapping.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value[0];
        assert_eq!(first["archivePath"], "lib/gson.jar");
        assert_eq!(first["contributorKind"], "ProjectLibraryFile");
        assert_eq!(first["byteSize"], 42);
        assert!(first.get("owningModule").is_none());
        assert_eq!(value[1]["reason"], "resource");

        let text = fs::read_to_string(temp.path().join("report/content.txt")).unwrap();
        assert!(text.starts_with("lib/app.jar"));
    }
}
