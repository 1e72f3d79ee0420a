//! Library placement: project libraries first, then the module-scoped
//! libraries of every packed module.

use std::path::Path;

use anyhow::Result;

use super::plan::{Claim, Contributor, Owner};
use super::UnitContext;
use crate::artifact::{ContentSource, EntryFilter};
use crate::layout::naming::{is_archive_path, library_archive_name, strip_version};
use crate::layout::PackMode;
use crate::resolver::{DependencyScope, LibraryKind};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn join(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

impl UnitContext<'_> {
    /// Place a library source into an archive owned by `owner`.
    fn add_standalone(
        &mut self,
        archive: &str,
        owner: &str,
        contributor: Contributor,
        source: ContentSource,
    ) -> Result<()> {
        self.plan.claim_standalone(archive, owner)?;
        let index = self.plan.archive_mut(archive);
        let id = self.plan.contributor(index, contributor);
        self.plan.add_library_source(index, id, source);
        Ok(())
    }

    fn add_library(&mut self, archive: &str, contributor: Contributor, source: ContentSource) {
        let index = self.plan.archive_mut(archive);
        let id = self.plan.contributor(index, contributor);
        self.plan.add_library_source(index, id, source);
    }

    /// Resolve and place every project library of the layout.
    ///
    /// Libraries left in `Merged` mode are only queued; they are flushed
    /// into the main archive after everything else is placed.
    pub(super) fn place_project_libraries(&mut self) -> Result<()> {
        let layout = self.layout;
        for library in layout.project_libraries() {
            let name = library.name.as_str();
            let files = self.packer.resolver.project_library_files(name)?;

            let mut mode = library.pack_mode;
            if mode == PackMode::Merged && !self.packer.options.mergeable_libraries.contains(name) {
                mode = PackMode::StandaloneMerged;
                self.packer.observer.event(
                    "library demoted",
                    &[
                        ("unit", layout.name().to_string()),
                        ("library", name.to_string()),
                        ("archive", library_archive_name(name)),
                    ],
                );
            }

            let explicit_archive = library
                .output_subpath
                .as_deref()
                .filter(|subpath| is_archive_path(subpath));
            let prefix = library
                .output_subpath
                .as_deref()
                .filter(|subpath| !is_archive_path(subpath))
                .unwrap_or("");

            for file in &files {
                if self.ownership.claim(file, Owner::Project(name.to_string()))? == Claim::Duplicate {
                    continue;
                }
                let contributor = Contributor::project_library(name, file, library.reason.clone());

                if let Some(archive) = explicit_archive {
                    let source = ContentSource::library_file(file, EntryFilter::DropSignatures);
                    self.add_standalone(archive, name, contributor, source)?;
                    continue;
                }

                match mode {
                    PackMode::Merged => {
                        let source = ContentSource::library_file(file, EntryFilter::DropSignatures);
                        self.pending_merge.push((contributor, source));
                    }
                    PackMode::StandaloneMerged => {
                        let archive = join(prefix, &library_archive_name(name));
                        let source = ContentSource::library_file(file, EntryFilter::DropSignatures);
                        self.add_standalone(&archive, name, contributor, source)?;
                    }
                    PackMode::StandaloneSeparate | PackMode::StandaloneSeparateNoVersion => {
                        let file_name = file_name(file);
                        let archive_name = if mode == PackMode::StandaloneSeparateNoVersion {
                            strip_version(&file_name)
                        } else {
                            file_name.clone()
                        };
                        let archive = join(prefix, &archive_name);
                        let owner = format!("{name} ({file_name})");
                        let source = ContentSource::library_file(file, EntryFilter::All);
                        self.add_standalone(&archive, &owner, contributor, source)?;
                    }
                }
            }
            self.placed_project_libraries.insert(name.to_string());
        }
        Ok(())
    }

    /// Place the compile/runtime module-scoped libraries of every packed
    /// module, then the module libraries the layout places explicitly.
    pub(super) fn place_module_libraries(&mut self) -> Result<()> {
        let layout = self.layout;
        let resolver = self.packer.resolver;

        for (archive, modules) in layout.archives() {
            let target = self.actual_archive(archive, modules);
            for module in modules {
                if layout.library_auto_inclusion_disabled(module) {
                    continue;
                }
                let dependencies = resolver.module_libraries(module, &DependencyScope::PACKAGED)?;
                for dependency in dependencies.iter().filter(|d| d.kind == LibraryKind::Module) {
                    let library = dependency.name.as_str();
                    if layout.is_module_library_excluded(module, library)
                        || layout.is_module_library_placed(module, library)
                        || self.placed_project_libraries.contains(library)
                    {
                        continue;
                    }

                    for file in resolver.module_library_files(module, library)? {
                        let owner = Owner::Module {
                            module: module.clone(),
                            library: library.to_string(),
                        };
                        if self.ownership.claim(&file, owner)? == Claim::Duplicate {
                            continue;
                        }
                        let contributor = Contributor::module_library(module, library, &file);
                        let stripped = strip_version(&file_name(&file));
                        if self.packer.options.is_runtime_helper(&stripped) {
                            let source = ContentSource::library_file(&file, EntryFilter::All);
                            self.add_standalone(&stripped, library, contributor, source)?;
                        } else {
                            let source = ContentSource::library_file(&file, EntryFilter::DropSignatures);
                            self.add_library(&target, contributor, source);
                        }
                    }
                }
            }
        }

        for data in layout.module_libraries() {
            let files = resolver.module_library_files(&data.module_name, &data.library_name)?;
            for file in &files {
                let owner = Owner::Module {
                    module: data.module_name.clone(),
                    library: data.library_name.clone(),
                };
                if self.ownership.claim(file, owner)? == Claim::Duplicate {
                    continue;
                }
                let contributor = Contributor::module_library(&data.module_name, &data.library_name, file);
                if is_archive_path(&data.relative_output_path) {
                    let source = ContentSource::library_file(file, EntryFilter::DropSignatures);
                    self.add_library(&data.relative_output_path, contributor, source);
                } else {
                    let archive = join(&data.relative_output_path, &file_name(file));
                    let source = ContentSource::library_file(file, EntryFilter::All);
                    self.add_library(&archive, contributor, source);
                }
            }
        }
        Ok(())
    }

    /// Flush queued merged libraries into the unit's main archive.
    pub(super) fn flush_merged_libraries(&mut self) {
        if self.pending_merge.is_empty() {
            return;
        }
        let layout = self.layout;
        let main = layout.main_archive();
        let modules = layout
            .archives()
            .find(|(archive, _)| *archive == main)
            .map(|(_, modules)| modules)
            .unwrap_or_default();
        let target = self.actual_archive(main, modules);
        for (contributor, source) in std::mem::take(&mut self.pending_merge) {
            self.add_library(&target, contributor, source);
        }
    }
}
