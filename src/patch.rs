//! In-memory overlay over compiled module output.
//!
//! Build steps stage regenerated files here instead of touching the
//! compiler's output directory, which may be shared with other builds. The
//! packer writes overlay directories, then byte patches, then the compiled
//! output; the first entry with a name wins, and reads follow the same order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::artifact::is_excluded;
use crate::error::PackError;
use crate::resolver::Resolver;

/// Path of the plugin descriptor inside a module's output.
pub const PLUGIN_DESCRIPTOR: &str = "META-INF/plugin.xml";

/// Byte and directory overlays keyed by module.
///
/// Shared by sibling packing tasks; every mutation goes through the map's
/// entry API so two tasks never race on the same module.
#[derive(Debug, Default)]
pub struct OutputPatchSet {
    files: DashMap<String, BTreeMap<String, Bytes>>,
    dirs: DashMap<String, Vec<PathBuf>>,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

impl OutputPatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `data` at `path`. Fails if the path is already patched.
    pub fn set(&self, module: &str, path: &str, data: impl Into<Bytes>) -> Result<(), PackError> {
        self.put(module, path, data.into(), false)
    }

    /// Stage `data` at `path`, replacing an earlier patch.
    pub fn set_overwriting(&self, module: &str, path: &str, data: impl Into<Bytes>) {
        // Overwriting never conflicts.
        let _ = self.put(module, path, data.into(), true);
    }

    fn put(&self, module: &str, path: &str, data: Bytes, overwrite: bool) -> Result<(), PackError> {
        let path = normalize(path);
        let mut patches = self.files.entry(module.to_string()).or_default();
        if !overwrite && patches.contains_key(&path) {
            return Err(PackError::DuplicatePatch {
                module: module.to_string(),
                path,
            });
        }
        patches.insert(path, data);
        Ok(())
    }

    /// Overlay the whole content of `dir` on the module's output.
    pub fn set_from_directory(&self, module: &str, dir: impl Into<PathBuf>) -> Result<(), PackError> {
        let dir = dir.into();
        match self.dirs.entry(module.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().contains(&dir) {
                    return Err(PackError::DuplicatePatchDir {
                        module: module.to_string(),
                        dir,
                    });
                }
                entry.get_mut().push(dir);
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![dir]);
            }
        }
        Ok(())
    }

    pub fn get(&self, module: &str, path: &str) -> Option<Bytes> {
        self.files
            .get(module)
            .and_then(|patches| patches.get(&normalize(path)).cloned())
    }

    /// Byte patches of a module sorted by path.
    pub fn patches_for(&self, module: &str) -> Vec<(String, Bytes)> {
        self.files
            .get(module)
            .map(|patches| {
                patches
                    .iter()
                    .map(|(path, data)| (path.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Overlay directories of a module in staging order.
    pub fn directories_for(&self, module: &str) -> Vec<PathBuf> {
        self.dirs
            .get(module)
            .map(|dirs| dirs.clone())
            .unwrap_or_default()
    }

    /// Read `path` from the module's overlays in the order the packer writes
    /// them: overlay directories in staging order, then byte patches.
    pub fn read_overlay(&self, module: &str, path: &str) -> Result<Option<Bytes>> {
        let relative = normalize(path);
        for dir in self.directories_for(module) {
            let file = dir.join(&relative);
            if file.is_file() {
                return read_bytes(&file).map(Some);
            }
        }
        Ok(self.get(module, &relative))
    }

    /// Read `path` for a module the way it ends up in an archive: the
    /// overlays, then compiled output unless `excludes` drop the path.
    pub fn read_patched(
        &self,
        resolver: &dyn Resolver,
        module: &str,
        path: &str,
        excludes: &[glob::Pattern],
    ) -> Result<Option<Bytes>> {
        if let Some(data) = self.read_overlay(module, path)? {
            return Ok(Some(data));
        }

        let relative = normalize(path);
        if is_excluded(&relative, excludes) {
            return Ok(None);
        }
        let file = resolver.module_output_dir(module)?.join(&relative);
        if file.is_file() {
            return read_bytes(&file).map(Some);
        }
        Ok(None)
    }

    /// The plugin descriptor of `module` after patching, if one is packed.
    pub fn patched_plugin_descriptor(
        &self,
        resolver: &dyn Resolver,
        module: &str,
        excludes: &[glob::Pattern],
    ) -> Result<Option<Bytes>> {
        self.read_patched(resolver, module, PLUGIN_DESCRIPTOR, excludes)
    }
}

fn read_bytes(path: &Path) -> Result<Bytes> {
    let data = fs::read(path).with_context(|| format!("reading '{}'", path.display()))?;
    Ok(Bytes::from(data))
}
