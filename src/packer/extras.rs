//! Artifacts, additional resources and generated resources.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::Packer;
use crate::artifact::filesystem::copy_path;
use crate::artifact::ContentSource;
use crate::layout::hooks::HookContext;
use crate::layout::Layout;
use crate::mapping::{ContributorKind, MappingEntry};

/// Copy included artifacts under `lib_dir` and attribute them to the
/// modules and libraries they package.
pub(super) fn copy_artifacts(
    packer: &Packer<'_>,
    layout: &Layout,
    lib_dir: &Path,
    entries: &mut Vec<MappingEntry>,
    write: bool,
) -> Result<()> {
    for (name, relative_path) in layout.artifacts() {
        let artifact = packer.resolver.require_artifact(name)?;
        let dir = lib_dir.join(relative_path);
        let destination = if artifact.output.is_dir() {
            dir
        } else {
            match artifact.output.file_name() {
                Some(file_name) => dir.join(file_name),
                None => dir,
            }
        };

        if write {
            copy_path(&artifact.output, &destination)
                .with_context(|| format!("copying artifact '{name}'"))?;
        }

        let reason = format!("artifact: {name}");
        for module in &artifact.modules {
            entries.push(MappingEntry::module_output(&destination, module, 0).with_reason(&reason));
        }
        for module in &artifact.test_modules {
            entries.push(MappingEntry::module_test_output(&destination, module).with_reason(&reason));
        }
        for library in &artifact.libraries {
            entries.push(MappingEntry {
                archive_path: destination.clone(),
                contributor_kind: ContributorKind::ProjectLibraryFile,
                contributor_name: library.clone(),
                owning_module: None,
                library_file: None,
                reason: Some(reason.clone()),
                byte_size: 0,
            });
        }
    }
    Ok(())
}

/// Copy, or zip without compression, the layout's additional resources.
pub(super) fn copy_resources(
    packer: &Packer<'_>,
    layout: &Layout,
    unit_dir: &Path,
    entries: &mut Vec<MappingEntry>,
    write: bool,
) -> Result<()> {
    for resource in layout.resources() {
        let source = packer
            .resolver
            .module_content_root(&resource.module)?
            .join(&resource.source);
        let target_dir = unit_dir.join(&resource.target);
        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| resource.module.clone());

        let destination = if resource.pack_to_zip {
            target_dir.join(format!("{source_name}.zip"))
        } else if source.is_dir() {
            target_dir
        } else {
            target_dir.join(&source_name)
        };

        let size = if !write {
            0
        } else if resource.pack_to_zip {
            let content = if source.is_dir() {
                ContentSource::directory(&source)
            } else {
                ContentSource::File {
                    path: source.clone(),
                    entry: source_name.clone(),
                }
            };
            packer
                .writer
                .write(&destination, &[content], false)
                .with_context(|| format!("zipping resource '{}'", source.display()))?
                .iter()
                .sum()
        } else {
            copy_path(&source, &destination)
                .with_context(|| format!("copying resource '{}'", source.display()))?
        };

        entries.push(
            MappingEntry::module_output(&destination, &resource.module, size).with_reason("resource"),
        );
    }
    Ok(())
}

/// Run resource generators in registration order and copy what they
/// produce into the unit directory.
pub(super) fn run_resource_generators(
    packer: &Packer<'_>,
    layout: &Layout,
    unit_dir: &Path,
) -> Result<()> {
    let ctx = HookContext {
        layout,
        resolver: packer.resolver,
        build_number: &packer.options.build_number,
    };
    for (index, generator) in layout.resource_generators().iter().enumerate() {
        let scratch = unit_dir.join(format!(".generated-{index}"));
        fs::create_dir_all(&scratch)
            .with_context(|| format!("Failed to create directory: {}", scratch.display()))?;

        let produced = generator
            .generate(&scratch, &ctx)
            .with_context(|| format!("resource generator {generator:?} of '{}'", layout.name()));
        let copied = match produced {
            Ok(Some(path)) => {
                let target = unit_dir.join(generator.target());
                let destination = match (path.is_dir(), path.file_name()) {
                    (false, Some(name)) => target.join(name),
                    _ => target,
                };
                copy_path(&path, &destination).map(|_| ())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        fs::remove_dir_all(&scratch)
            .with_context(|| format!("Failed to remove {}", scratch.display()))?;
        copied?;
    }
    Ok(())
}
