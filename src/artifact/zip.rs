//! Deterministic zip archive writer.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};
use anyhow::{Context, Result};
use walkdir::WalkDir;

use super::filesystem::atomic_move;
use super::{is_excluded, ArchiveWriter, ContentSource, EntryFilter};

const ENTRY_PERMISSIONS: u32 = 0o644;

/// Writes zip archives with fixed timestamps and permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveWriter;

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write(&self, target: &Path, sources: &[ContentSource], compress: bool) -> Result<Vec<u64>> {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let tmp = parent.join(format!(".{file_name}.tmp"));

        let result = write_to(&tmp, sources, compress);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        let sizes = result.with_context(|| format!("Failed to write archive {}", target.display()))?;
        atomic_move(&tmp, target)?;
        Ok(sizes)
    }
}

fn write_to(path: &Path, sources: &[ContentSource], compress: bool) -> Result<Vec<u64>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(DateTime::default())
        .unix_permissions(ENTRY_PERMISSIONS);

    let mut writer = EntryWriter {
        zip: &mut zip,
        options,
        written: HashSet::new(),
    };
    let mut sizes = Vec::with_capacity(sources.len());
    for source in sources {
        sizes.push(writer.source(source)?);
    }

    let mut out = zip.finish().context("Failed to finish zip archive")?;
    out.flush()?;
    Ok(sizes)
}

struct EntryWriter<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
    options: SimpleFileOptions,
    written: HashSet<String>,
}

impl<W: Write + Seek> EntryWriter<'_, W> {
    fn source(&mut self, source: &ContentSource) -> Result<u64> {
        match source {
            ContentSource::Directory {
                root,
                prefix,
                excludes,
            } => self.directory(root, prefix, excludes),
            ContentSource::File { path, entry } => {
                let mut file =
                    File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
                self.entry(entry, &mut file)
            }
            ContentSource::Bytes { entry, data } => self.entry(entry, &mut &data[..]),
            ContentSource::Archive { path, filter } => self.archive(path, *filter),
        }
    }

    fn entry(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        if !self.written.insert(name.to_string()) {
            return Ok(0);
        }
        self.zip
            .start_file(name, self.options)
            .with_context(|| format!("Failed to start entry {name}"))?;
        let size = io::copy(reader, &mut *self.zip)
            .with_context(|| format!("Failed to write entry {name}"))?;
        Ok(size)
    }

    fn directory(&mut self, root: &Path, prefix: &str, excludes: &[glob::Pattern]) -> Result<u64> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for ent in WalkDir::new(root).follow_links(false) {
            let ent = ent.with_context(|| format!("Failed to read directory: {}", root.display()))?;
            if !ent.file_type().is_file() {
                continue;
            }
            let rel = ent
                .path()
                .strip_prefix(root)
                .unwrap_or(ent.path())
                .to_string_lossy()
                .replace('\\', "/");
            if is_excluded(&rel, excludes) {
                continue;
            }
            files.push((rel, ent.into_path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let prefix = prefix.trim_matches('/');
        let mut total = 0;
        for (rel, path) in files {
            let name = if prefix.is_empty() {
                rel
            } else {
                format!("{prefix}/{rel}")
            };
            let mut file =
                File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            total += self.entry(&name, &mut file)?;
        }
        Ok(total)
    }

    fn archive(&mut self, path: &Path, filter: EntryFilter) -> Result<u64> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive {}", path.display()))?;

        let mut total = 0;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read entry {} of {}", i, path.display()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if !filter.accepts(&name) {
                continue;
            }
            total += self.entry(&name, &mut entry)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_first_entry_wins_and_sizes_per_source() {
        let temp = TempDir::new().unwrap();
        let classes = temp.path().join("classes");
        fs::create_dir_all(classes.join("pkg")).unwrap();
        fs::write(classes.join("pkg/A.class"), "original").unwrap();
        fs::write(classes.join("b.txt"), "bb").unwrap();

        let target = temp.path().join("out/app.jar");
        let sizes = ZipArchiveWriter
            .write(
                &target,
                &[
                    ContentSource::Bytes {
                        entry: "pkg/A.class".into(),
                        data: Bytes::from("patched!!"),
                    },
                    ContentSource::directory(&classes),
                ],
                true,
            )
            .unwrap();

        assert_eq!(sizes, vec![9, 2]);
        assert_eq!(entry_names(&target), vec!["pkg/A.class", "b.txt"]);
        assert_eq!(read_entry(&target, "pkg/A.class"), "patched!!");
    }

    #[test]
    fn test_excludes_and_prefix() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("res");
        fs::create_dir_all(root.join("icons")).unwrap();
        fs::write(root.join("icons/a.png"), "png").unwrap();
        fs::write(root.join("a.txt"), "txt").unwrap();

        let target = temp.path().join("res.zip");
        ZipArchiveWriter
            .write(
                &target,
                &[ContentSource::Directory {
                    root: root.clone(),
                    prefix: "res/".into(),
                    excludes: vec![glob::Pattern::new("**/*.png").unwrap()],
                }],
                false,
            )
            .unwrap();
        assert_eq!(entry_names(&target), vec!["res/a.txt"]);
    }

    #[test]
    fn test_nested_archive_entries_are_filtered() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("lib.jar");
        ZipArchiveWriter
            .write(
                &lib,
                &[
                    ContentSource::Bytes {
                        entry: "META-INF/LIB.SF".into(),
                        data: Bytes::from("sig"),
                    },
                    ContentSource::Bytes {
                        entry: "lib/L.class".into(),
                        data: Bytes::from("class"),
                    },
                ],
                true,
            )
            .unwrap();

        let target = temp.path().join("merged.jar");
        let sizes = ZipArchiveWriter
            .write(
                &target,
                &[ContentSource::Archive {
                    path: lib,
                    filter: EntryFilter::DropSignatures,
                }],
                true,
            )
            .unwrap();
        assert_eq!(sizes, vec![5]);
        assert_eq!(entry_names(&target), vec!["lib/L.class"]);
    }

    #[test]
    fn test_output_is_reproducible() {
        let temp = TempDir::new().unwrap();
        let classes = temp.path().join("classes");
        fs::create_dir_all(classes.join("z")).unwrap();
        fs::write(classes.join("z/Z.class"), "zz").unwrap();
        fs::write(classes.join("A.class"), "aa").unwrap();

        let sources = [ContentSource::directory(&classes)];
        let first = temp.path().join("first.jar");
        let second = temp.path().join("second.jar");
        ZipArchiveWriter.write(&first, &sources, true).unwrap();
        ZipArchiveWriter.write(&second, &sources, true).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        assert!(!temp.path().join(".first.jar.tmp").exists());
    }
}
