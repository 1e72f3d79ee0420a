//! Checks and hooks that run before a unit is planned.

use anyhow::{Context, Result};

use super::Packer;
use crate::error::PackError;
use crate::layout::hooks::{HookContext, LayoutPatcher};
use crate::layout::{Layout, LayoutKind};
use crate::patch::OutputPatchSet;
use crate::resolver::Resolver;

/// Excludes for a module without compiled output point at a stale layout.
pub(super) fn verify_excludes(resolver: &dyn Resolver, layout: &Layout) -> Result<()> {
    for module in layout.modules_with_excludes() {
        let output = resolver.module_output_dir(module)?;
        if !output.is_dir() {
            return Err(PackError::ExcludesForMissingOutput {
                module: module.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Run the layout's patchers in registration order.
pub(super) fn run_patchers(packer: &Packer<'_>, layout: &Layout) -> Result<()> {
    let ctx = HookContext {
        layout,
        resolver: packer.resolver,
        build_number: &packer.options.build_number,
    };
    for (index, patcher) in layout.patchers().iter().enumerate() {
        patcher
            .apply(packer.patches, &ctx)
            .with_context(|| format!("patcher #{} of '{}' ({:?})", index + 1, layout.name(), patcher))?;
    }
    Ok(())
}

/// Stage the build's version and compatibility range in a plugin's
/// descriptor, after the layout's own patchers.
pub(super) fn patch_descriptor(packer: &Packer<'_>, layout: &Layout) -> Result<()> {
    let Some(patcher) = packer.descriptor else {
        return Ok(());
    };
    let ctx = HookContext {
        layout,
        resolver: packer.resolver,
        build_number: &packer.options.build_number,
    };
    patcher.apply(packer.patches, &ctx)
}

/// A plugin needs exactly one top-level module whose packed content
/// carries the descriptor; a descriptor excluded from compiled output does
/// not count.
pub(super) fn verify_plugin_descriptor(
    resolver: &dyn Resolver,
    patches: &OutputPatchSet,
    layout: &Layout,
) -> Result<()> {
    if layout.kind() != LayoutKind::Plugin {
        return Ok(());
    }

    let mut carriers = Vec::new();
    for (archive, modules) in layout.archives() {
        if archive.contains('/') {
            continue;
        }
        for module in modules {
            if carriers.contains(module) {
                continue;
            }
            let excludes = layout.excludes_for(module);
            if patches
                .patched_plugin_descriptor(resolver, module, excludes)?
                .is_some()
            {
                carriers.push(module.clone());
            }
        }
    }

    match carriers.len() {
        1 => Ok(()),
        0 => Err(PackError::MissingPluginDescriptor {
            plugin: layout.name().to_string(),
        }
        .into()),
        _ => Err(PackError::MultiplePluginDescriptors {
            plugin: layout.name().to_string(),
            modules: carriers,
        }
        .into()),
    }
}
