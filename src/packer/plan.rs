//! The per-unit packing plan: archives, their ordered sources and the
//! contributor each source is attributed to.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::artifact::ContentSource;
use crate::error::PackError;
use crate::mapping::{ContributorKind, MappingEntry};

/// Index of a contributor within a [`UnitPlan`].
pub(crate) type ContributorId = usize;

/// Identity of one mapping entry before its size is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Contributor {
    pub kind: ContributorKind,
    pub name: String,
    pub owning_module: Option<String>,
    pub library_file: Option<PathBuf>,
    pub reason: Option<String>,
}

impl Contributor {
    pub fn module(name: &str) -> Self {
        Self {
            kind: ContributorKind::ModuleOutput,
            name: name.to_string(),
            owning_module: None,
            library_file: None,
            reason: None,
        }
    }

    pub fn project_library(name: &str, file: &Path, reason: Option<String>) -> Self {
        Self {
            kind: ContributorKind::ProjectLibraryFile,
            name: name.to_string(),
            owning_module: None,
            library_file: Some(file.to_path_buf()),
            reason,
        }
    }

    pub fn module_library(module: &str, name: &str, file: &Path) -> Self {
        Self {
            kind: ContributorKind::ModuleLibraryFile,
            name: name.to_string(),
            owning_module: Some(module.to_string()),
            library_file: Some(file.to_path_buf()),
            reason: None,
        }
    }

    fn label(&self) -> String {
        match &self.owning_module {
            Some(module) => format!("{:?} '{}' of module '{}'", self.kind, self.name, module),
            None => format!("{:?} '{}'", self.kind, self.name),
        }
    }
}

/// One output archive, path relative to the unit's `lib` directory.
#[derive(Debug, Default)]
pub(crate) struct PlannedArchive {
    pub path: String,
    /// Module content: patch directories, patch bytes, compiled output.
    pub module_sources: Vec<(ContributorId, ContentSource)>,
    /// Library content, written after all module content.
    pub library_sources: Vec<(ContributorId, ContentSource)>,
    pub contributors: Vec<ContributorId>,
}

impl PlannedArchive {
    /// Sources in write order.
    pub fn ordered_sources(&self) -> impl Iterator<Item = &(ContributorId, ContentSource)> {
        self.module_sources.iter().chain(self.library_sources.iter())
    }
}

/// Everything the packer decided for one unit.
#[derive(Debug, Default)]
pub(crate) struct UnitPlan {
    pub archives: Vec<PlannedArchive>,
    index: HashMap<String, usize>,
    pub contributors: Vec<Contributor>,
    /// Contributor ids per (archive, contributor) pair.
    contributor_index: HashMap<(usize, ContributorKey), ContributorId>,
    /// Library-owned archives and the library that claimed them.
    standalone_owners: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContributorKey {
    kind: ContributorKind,
    name: String,
    owning_module: Option<String>,
    library_file: Option<PathBuf>,
}

impl UnitPlan {
    pub fn archive_mut(&mut self, path: &str) -> usize {
        if let Some(&index) = self.index.get(path) {
            return index;
        }
        self.archives.push(PlannedArchive {
            path: path.to_string(),
            ..Default::default()
        });
        let index = self.archives.len() - 1;
        self.index.insert(path.to_string(), index);
        index
    }

    /// Register `contributor` for the archive, reusing an existing id for
    /// the same identity.
    pub fn contributor(&mut self, archive: usize, contributor: Contributor) -> ContributorId {
        let key = ContributorKey {
            kind: contributor.kind,
            name: contributor.name.clone(),
            owning_module: contributor.owning_module.clone(),
            library_file: contributor.library_file.clone(),
        };
        if let Some(&id) = self.contributor_index.get(&(archive, key.clone())) {
            return id;
        }
        self.contributors.push(contributor);
        let id = self.contributors.len() - 1;
        self.contributor_index.insert((archive, key), id);
        self.archives[archive].contributors.push(id);
        id
    }

    pub fn add_module_source(&mut self, archive: usize, id: ContributorId, source: ContentSource) {
        self.archives[archive].module_sources.push((id, source));
    }

    pub fn add_library_source(&mut self, archive: usize, id: ContributorId, source: ContentSource) {
        self.archives[archive].library_sources.push((id, source));
    }

    /// Claim an archive for one library. Two different libraries writing
    /// the same standalone archive would silently mix their content.
    pub fn claim_standalone(&mut self, archive: &str, owner: &str) -> Result<(), PackError> {
        match self.standalone_owners.get(archive) {
            Some(existing) if existing != owner => Err(PackError::LayoutConflict {
                subject: archive.to_string(),
                first: existing.clone(),
                second: owner.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.standalone_owners
                    .insert(archive.to_string(), owner.to_string());
                Ok(())
            }
        }
    }

    /// Turn measured sizes into mapping entries.
    ///
    /// `sizes[i]` holds the sizes reported for archive `i`, one per source
    /// in write order; `None` means nothing was written (dry run) and every
    /// contributor is recorded with size 0.
    pub fn into_entries(
        self,
        lib_dir: &Path,
        sizes: &[Option<Vec<u64>>],
    ) -> Result<Vec<MappingEntry>, PackError> {
        let mut entries = Vec::new();
        for (index, archive) in self.archives.iter().enumerate() {
            let mut measured: HashMap<ContributorId, u64> = HashMap::new();
            let archive_sizes = sizes.get(index).and_then(Option::as_ref);
            if let Some(reported) = archive_sizes {
                for ((id, _), size) in archive.ordered_sources().zip(reported.iter()) {
                    *measured.entry(*id).or_default() += size;
                }
            }

            for &id in &archive.contributors {
                let contributor = &self.contributors[id];
                let has_sources = archive.ordered_sources().any(|(owner, _)| *owner == id);
                let size = match (archive_sizes, measured.get(&id)) {
                    (None, _) => 0,
                    (Some(_), Some(size)) => *size,
                    (Some(_), None) if !has_sources => 0,
                    (Some(_), None) => {
                        return Err(PackError::UnmeasuredContributor {
                            archive: archive.path.clone(),
                            contributor: contributor.label(),
                        })
                    }
                };
                entries.push(MappingEntry {
                    archive_path: lib_dir.join(&archive.path),
                    contributor_kind: contributor.kind,
                    contributor_name: contributor.name.clone(),
                    owning_module: contributor.owning_module.clone(),
                    library_file: contributor.library_file.clone(),
                    reason: contributor.reason.clone(),
                    byte_size: size,
                });
            }
        }
        Ok(entries)
    }
}

/// Which library a physical file belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Owner {
    Project(String),
    Module { module: String, library: String },
}

impl Owner {
    fn label(&self) -> String {
        match self {
            Owner::Project(name) => format!("project library '{name}'"),
            Owner::Module { module, library } => {
                format!("library '{library}' of module '{module}'")
            }
        }
    }

    fn same_library(&self, other: &Owner) -> bool {
        match (self, other) {
            (Owner::Module { library: a, .. }, Owner::Module { library: b, .. }) => a == b,
            _ => self == other,
        }
    }
}

/// Result of claiming a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// First claim; the file must be packed.
    New,
    /// Already packed for the same library; skip it.
    Duplicate,
}

/// Unit-wide `file -> owning library` registry, filled while one unit is
/// planned.
#[derive(Debug, Default)]
pub(crate) struct OwnershipRegistry {
    owners: HashMap<PathBuf, Owner>,
}

impl OwnershipRegistry {
    pub fn claim(&mut self, file: &Path, owner: Owner) -> Result<Claim, PackError> {
        match self.owners.entry(file.to_path_buf()) {
            Entry::Vacant(entry) => {
                entry.insert(owner);
                Ok(Claim::New)
            }
            Entry::Occupied(entry) => {
                if entry.get().same_library(&owner) {
                    Ok(Claim::Duplicate)
                } else {
                    Err(PackError::FileOwnershipConflict {
                        file: file.to_path_buf(),
                        first: entry.get().label(),
                        second: owner.label(),
                    })
                }
            }
        }
    }
}
