//! Packing engine: turns one [`Layout`] into written archives and structure
//! mapping entries.
//!
//! # Passes
//!
//! 1. Pre-pack checks, layout patchers, then the descriptor patcher if one
//!    is attached ([`checks`])
//! 2. Project library placement; `Merged` libraries outside the mergeable
//!    set are demoted to their own archive
//! 3. Module-scoped library placement
//! 4. Module output: patch directories, patch bytes, compiled output minus
//!    excludes, then libraries unpacked into the archive; an unpacked file
//!    already placed for the same library is skipped
//! 5. Queued merged libraries go into the main archive
//! 6. Archives are written; artifacts, resources and generated resources
//!    are copied ([`extras`])
//!
//! Every physical library file is owned by exactly one library across the
//! whole unit. Module content always precedes library content in an
//! archive, and the first entry with a given name wins, so patches shadow
//! compiled files.

mod checks;
mod extras;
mod libraries;
mod plan;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::artifact::filesystem::sha256_file;
use crate::artifact::{ArchiveWriter, ContentSource};
use crate::config::BuildOptions;
use crate::descriptor::PluginDescriptorPatcher;
use crate::layout::Layout;
use crate::mapping::MappingEntry;
use crate::observer::{observe, BuildObserver};
use crate::patch::OutputPatchSet;
use crate::resolver::Resolver;
use plan::{Claim, Contributor, Owner, OwnershipRegistry, UnitPlan};

/// A finished archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArchive {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Result of packing one unit.
#[derive(Debug, Clone, Default)]
pub struct PackOutput {
    pub entries: Vec<MappingEntry>,
    pub archives: Vec<WrittenArchive>,
}

/// Packs layouts against one resolver, patch set and writer.
#[derive(Clone, Copy)]
pub struct Packer<'a> {
    resolver: &'a dyn Resolver,
    patches: &'a OutputPatchSet,
    writer: &'a dyn ArchiveWriter,
    observer: &'a dyn BuildObserver,
    options: &'a BuildOptions,
    descriptor: Option<&'a PluginDescriptorPatcher>,
}

impl<'a> Packer<'a> {
    pub fn new(
        resolver: &'a dyn Resolver,
        patches: &'a OutputPatchSet,
        writer: &'a dyn ArchiveWriter,
        observer: &'a dyn BuildObserver,
        options: &'a BuildOptions,
    ) -> Self {
        Self {
            resolver,
            patches,
            writer,
            observer,
            options,
            descriptor: None,
        }
    }

    /// Patch the descriptor of every plugin packed with this packer.
    pub fn with_descriptor_patcher(mut self, patcher: &'a PluginDescriptorPatcher) -> Self {
        self.descriptor = Some(patcher);
        self
    }

    /// Pack `layout` into `unit_dir`; archives land in `unit_dir/lib`.
    pub fn pack(&self, layout: &Layout, unit_dir: &Path) -> Result<PackOutput> {
        let attributes = [
            ("unit", layout.name().to_string()),
            ("dir", unit_dir.display().to_string()),
        ];
        observe(self.observer, "pack", &attributes, || {
            checks::verify_excludes(self.resolver, layout)?;
            checks::run_patchers(self, layout)?;
            checks::patch_descriptor(self, layout)?;
            checks::verify_plugin_descriptor(self.resolver, self.patches, layout)?;

            let plan = self.plan(layout)?;
            let lib_dir = unit_dir.join("lib");
            let mut output = self.write(plan, &lib_dir)?;
            extras::copy_artifacts(self, layout, &lib_dir, &mut output.entries, true)?;
            extras::copy_resources(self, layout, unit_dir, &mut output.entries, true)?;
            extras::run_resource_generators(self, layout, unit_dir)?;
            Ok(output)
        })
        .with_context(|| format!("packing '{}'", layout.name()))
    }

    /// Compute the structure mapping of `layout` without touching disk.
    ///
    /// Every entry has size 0. Patchers are not run and compiled output is
    /// not required to exist.
    pub fn plan_only(&self, layout: &Layout, unit_dir: &Path) -> Result<PackOutput> {
        let plan = self.plan(layout)?;
        let lib_dir = unit_dir.join("lib");
        let sizes = vec![None; plan.archives.len()];
        let mut entries = plan.into_entries(&lib_dir, &sizes)?;
        extras::copy_artifacts(self, layout, &lib_dir, &mut entries, false)?;
        extras::copy_resources(self, layout, unit_dir, &mut entries, false)?;
        Ok(PackOutput {
            entries,
            archives: Vec::new(),
        })
    }

    fn plan(&self, layout: &Layout) -> Result<UnitPlan> {
        for module in layout.included_modules() {
            self.resolver.require_module(module)?;
        }

        let mut unit = UnitContext {
            packer: self,
            layout,
            plan: UnitPlan::default(),
            ownership: OwnershipRegistry::default(),
            placed_project_libraries: HashSet::new(),
            pending_merge: Vec::new(),
        };
        unit.place_project_libraries()?;
        unit.place_module_libraries()?;
        unit.place_module_output()?;
        unit.flush_merged_libraries();
        Ok(unit.plan)
    }

    fn write(&self, plan: UnitPlan, lib_dir: &Path) -> Result<PackOutput> {
        let mut sizes = Vec::with_capacity(plan.archives.len());
        let mut archives = Vec::with_capacity(plan.archives.len());
        for archive in &plan.archives {
            let target = lib_dir.join(&archive.path);
            let sources: Vec<ContentSource> = archive
                .ordered_sources()
                .map(|(_, source)| source.clone())
                .collect();
            let reported = self
                .writer
                .write(&target, &sources, self.options.compress_archives)?;
            let (sha256, size) = sha256_file(&target)?;
            self.observer.event(
                "archive written",
                &[
                    ("archive", target.display().to_string()),
                    ("sources", sources.len().to_string()),
                    ("size", size.to_string()),
                ],
            );
            archives.push(WrittenArchive {
                path: target,
                sha256,
                size,
            });
            sizes.push(Some(reported));
        }
        let entries = plan.into_entries(lib_dir, &sizes)?;
        Ok(PackOutput { entries, archives })
    }

    pub(crate) fn renamed_modules(&self) -> &BTreeMap<String, String> {
        &self.options.renamed_modules
    }
}

/// Mutable state while planning one unit.
struct UnitContext<'a> {
    packer: &'a Packer<'a>,
    layout: &'a Layout,
    plan: UnitPlan,
    ownership: OwnershipRegistry,
    placed_project_libraries: HashSet<String>,
    pending_merge: Vec<(Contributor, ContentSource)>,
}

impl UnitContext<'_> {
    fn actual_archive(&self, archive: &str, modules: &[String]) -> String {
        self.layout
            .actual_archive_path(archive, modules, self.packer.renamed_modules())
    }

    /// Module content of every archive, in assignment order.
    fn place_module_output(&mut self) -> Result<()> {
        let layout = self.layout;
        let resolver = self.packer.resolver;
        let patches = self.packer.patches;

        for (archive, modules) in layout.archives() {
            let target = self.actual_archive(archive, modules);
            let index = self.plan.archive_mut(&target);

            for module in modules {
                let id = self.plan.contributor(index, Contributor::module(module));
                for dir in patches.directories_for(module) {
                    self.plan
                        .add_module_source(index, id, ContentSource::directory(dir));
                }
                for (entry, data) in patches.patches_for(module) {
                    self.plan
                        .add_module_source(index, id, ContentSource::Bytes { entry, data });
                }
                let output = resolver.module_output_dir(module)?;
                if output.is_dir() {
                    self.plan.add_module_source(
                        index,
                        id,
                        ContentSource::Directory {
                            root: output,
                            prefix: String::new(),
                            excludes: layout.excludes_for(module).to_vec(),
                        },
                    );
                }
            }

            for library in layout.libraries_unpacked_into(archive) {
                for file in resolver.project_library_files(library)? {
                    if self.ownership.claim(&file, Owner::Project(library.to_string()))? == Claim::Duplicate {
                        self.packer.observer.event(
                            "library file already placed",
                            &[
                                ("library", library.to_string()),
                                ("file", file.display().to_string()),
                                ("archive", target.clone()),
                            ],
                        );
                        continue;
                    }
                    let contributor =
                        Contributor::project_library(library, &file, Some("unpacked".to_string()));
                    let id = self.plan.contributor(index, contributor);
                    self.plan.add_library_source(
                        index,
                        id,
                        ContentSource::library_file(&file, crate::artifact::EntryFilter::DropSignatures),
                    );
                }
            }
        }
        Ok(())
    }
}
