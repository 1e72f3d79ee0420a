//! Whole-product distribution build.
//!
//! Packs the platform, the bundled plugins, the OS/arch-specific plugin sets
//! and the published plugins as independent orchestrator tasks:
//!
//! ```text
//! <dist>/lib                                   platform
//! <dist>/plugins/<dir>                         bundled, generic
//! <build>/dist.<os>.<arch>/plugins/<dir>       bundled, restricted to a target
//! <artifacts>/<product>-plugins/<dir>-<v>.zip  published
//! <artifacts>/content-mapping.json             report
//! ```
//!
//! Every group of plugins shares one [`OutputPatchSet`]; the platform and
//! each published plugin get their own. Every plugin's descriptor is
//! patched with the build's version before it is packed, and the published
//! zip is named after the version the patched descriptor declares. All
//! units, published plugins included, feed the structure mapping.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::artifact::{ArchiveWriter, ContentSource};
use crate::config::BuildOptions;
use crate::descriptor::{default_plugin_version, packed_plugin_version, PluginDescriptorPatcher};
use crate::error::PackError;
use crate::layout::bundling::{BundlingRestrictions, Target};
use crate::layout::naming::module_file_name;
use crate::layout::Layout;
use crate::mapping::StructureMapping;
use crate::observer::BuildObserver;
use crate::orchestrator::Orchestrator;
use crate::packer::{PackOutput, Packer, WrittenArchive};
use crate::patch::OutputPatchSet;
use crate::resolver::Resolver;

pub const STEP_PLATFORM: &str = "platform";
pub const STEP_BUNDLED_PLUGINS: &str = "bundled-plugins";
pub const STEP_OS_SPECIFIC_PLUGINS: &str = "os-specific-plugins";
pub const STEP_PUBLISHED_PLUGINS: &str = "published-plugins";
pub const STEP_REPORT: &str = "report";

/// A plugin layout and where it ships.
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub layout: Layout,
    /// Packed into the distribution's plugin directories.
    pub bundled: bool,
    /// Zipped for separate publication.
    pub published: bool,
}

impl PluginEntry {
    pub fn main_module(&self) -> &str {
        self.layout.name()
    }

    /// Plugin directory name after renamed-module substitution.
    pub fn directory_name(&self, options: &BuildOptions) -> String {
        match self.layout.plugin() {
            Some(info) => info.actual_directory_name(&options.renamed_modules),
            None => module_file_name(self.layout.name()),
        }
    }

    pub fn bundling(&self) -> BundlingRestrictions {
        self.layout
            .plugin()
            .map(|info| info.bundling.clone())
            .unwrap_or_default()
    }

}

/// The platform and every plugin of one product.
#[derive(Debug, Clone)]
pub struct DistributionPlan {
    pub platform: Layout,
    pub plugins: Vec<PluginEntry>,
}

impl DistributionPlan {
    pub fn new(platform: Layout, plugins: Vec<PluginEntry>) -> Result<Self, PackError> {
        let mut seen = BTreeSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.main_module()) {
                return Err(PackError::DuplicatePlugin {
                    main_module: plugin.main_module().to_string(),
                });
            }
        }
        Ok(Self { platform, plugins })
    }

    /// Bundled plugins for the generic directory (`None`) or one target,
    /// sorted by main module. Directories listed in
    /// `bundled_plugin_dirs_to_skip` are left out.
    pub fn bundled_plugins(&self, target: Option<Target>, options: &BuildOptions) -> Vec<&PluginEntry> {
        let mut selected: Vec<&PluginEntry> = self
            .plugins
            .iter()
            .filter(|p| p.bundled)
            .filter(|p| p.bundling().satisfied_by(target, options.eap))
            .filter(|p| {
                !options
                    .bundled_plugin_dirs_to_skip
                    .contains(&p.directory_name(options))
            })
            .collect();
        selected.sort_by(|a, b| a.main_module().cmp(b.main_module()));
        selected
    }

    pub fn published_plugins(&self) -> Vec<&PluginEntry> {
        let mut selected: Vec<&PluginEntry> = self.plugins.iter().filter(|p| p.published).collect();
        selected.sort_by(|a, b| a.main_module().cmp(b.main_module()));
        selected
    }
}

/// Output locations of a distribution build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPaths {
    /// Root of all build output; archive paths in the report are relative
    /// to it.
    pub build: PathBuf,
    /// OS-independent distribution.
    pub dist: PathBuf,
    /// Published plugin zips and the report.
    pub artifacts: PathBuf,
}

impl DistributionPaths {
    /// `<build>/dist` and `<build>/artifacts`.
    pub fn under(build: impl Into<PathBuf>) -> Self {
        let build = build.into();
        Self {
            dist: build.join("dist"),
            artifacts: build.join("artifacts"),
            build,
        }
    }
}

/// What a distribution build produced.
#[derive(Debug, Default)]
pub struct DistributionOutput {
    /// Entries of every packed unit, ordered by archive.
    pub mapping: StructureMapping,
    /// Every archive written, sorted by path.
    pub archives: Vec<WrittenArchive>,
    /// Published plugin zips, sorted.
    pub published: Vec<PathBuf>,
}

/// Builds a [`DistributionPlan`] on the orchestrator.
#[derive(Clone, Copy)]
pub struct DistributionBuilder<'a> {
    resolver: &'a dyn Resolver,
    writer: &'a dyn ArchiveWriter,
    observer: &'a dyn BuildObserver,
    options: &'a BuildOptions,
}

/// Shared sinks the unit tasks report into.
#[derive(Default)]
struct Collected {
    mapping: StructureMapping,
    archives: Mutex<Vec<WrittenArchive>>,
    published: Mutex<Vec<PathBuf>>,
}

impl<'a> DistributionBuilder<'a> {
    pub fn new(
        resolver: &'a dyn Resolver,
        writer: &'a dyn ArchiveWriter,
        observer: &'a dyn BuildObserver,
        options: &'a BuildOptions,
    ) -> Self {
        Self {
            resolver,
            writer,
            observer,
            options,
        }
    }

    fn packer<'p>(&self, patches: &'p OutputPatchSet) -> Packer<'p>
    where
        'a: 'p,
    {
        Packer::new(self.resolver, patches, self.writer, self.observer, self.options)
    }

    /// A whole step group may be listed in `steps_to_skip`.
    fn group_enabled(&self, step: &str) -> bool {
        if self.options.is_step_skipped(step) {
            self.observer.event(
                "step skipped",
                &[("step", step.to_string()), ("reason", "requested".to_string())],
            );
            return false;
        }
        true
    }

    pub fn build(&self, plan: &DistributionPlan, paths: &DistributionPaths) -> Result<DistributionOutput> {
        let options = self.options;
        let orchestrator = Orchestrator::new(options, self.observer)?;

        let platform_patches = OutputPatchSet::new();
        let bundled_patches = OutputPatchSet::new();
        let target_patches: Vec<OutputPatchSet> =
            options.targets.iter().map(|_| OutputPatchSet::new()).collect();
        let published = plan.published_plugins();
        let published_patches: Vec<OutputPatchSet> =
            published.iter().map(|_| OutputPatchSet::new()).collect();
        let sinks = Collected::default();
        let default_version = default_plugin_version(&options.build_number);
        let bundled_descriptor = PluginDescriptorPatcher::new(options, &default_version, false);
        let published_descriptor = PluginDescriptorPatcher::new(options, &default_version, true);

        orchestrator.run(|graph| {
            let collected = &sinks;
            let packer = self.packer(&platform_patches);
            let platform = &plan.platform;
            let dist = paths.dist.clone();
            graph.submit(STEP_PLATFORM, move || {
                collect(collected, packer.pack(platform, &dist)?);
                Ok(())
            });

            if self.group_enabled(STEP_BUNDLED_PLUGINS) {
                let packer = self
                    .packer(&bundled_patches)
                    .with_descriptor_patcher(&bundled_descriptor);
                for plugin in plan.bundled_plugins(None, options) {
                    let dir = plugin.directory_name(options);
                    let unit_dir = paths.dist.join("plugins").join(&dir);
                    graph.submit(format!("{STEP_BUNDLED_PLUGINS}:{dir}"), move || {
                        collect(collected, packer.pack(&plugin.layout, &unit_dir)?);
                        Ok(())
                    });
                }
            }

            if self.group_enabled(STEP_OS_SPECIFIC_PLUGINS) {
                for (target, patches) in options.targets.iter().zip(&target_patches) {
                    let packer = self
                        .packer(patches)
                        .with_descriptor_patcher(&bundled_descriptor);
                    let target_dir = paths.build.join(target.dist_dir_name());
                    for plugin in plan.bundled_plugins(Some(*target), options) {
                        let dir = plugin.directory_name(options);
                        let unit_dir = target_dir.join("plugins").join(&dir);
                        let id = format!("{STEP_OS_SPECIFIC_PLUGINS}:{}:{dir}", target.dist_dir_name());
                        graph.submit(id, move || {
                            collect(collected, packer.pack(&plugin.layout, &unit_dir)?);
                            Ok(())
                        });
                    }
                }
            }

            if self.group_enabled(STEP_PUBLISHED_PLUGINS) {
                let default_version = default_version.as_str();
                for (plugin, patches) in published.iter().zip(&published_patches) {
                    let packer = self
                        .packer(patches)
                        .with_descriptor_patcher(&published_descriptor);
                    let dir = plugin.directory_name(options);
                    let builder = *self;
                    let id = format!("{STEP_PUBLISHED_PLUGINS}:{dir}");
                    graph.submit(id, move || {
                        let unit = PublishUnit {
                            packer,
                            patches,
                            plugin,
                            dir: &dir,
                            default_version,
                        };
                        let (output, zip) = builder.publish(unit, paths)?;
                        collect(collected, output);
                        collected.published.lock().push(zip);
                        Ok(())
                    });
                }
            }

            // Units must settle before the report can be written.
            graph.join_all()?;
            collected.mapping.sort_by_archive();
            let mapping = &collected.mapping;
            graph.submit_optional(STEP_REPORT, move || {
                mapping.write_report(&paths.artifacts, &paths.build)
            });
            Ok(())
        })?;

        let Collected {
            mapping,
            archives,
            published,
        } = sinks;
        let mut archives = archives.into_inner();
        archives.sort_by(|a, b| a.path.cmp(&b.path));
        let mut published = published.into_inner();
        published.sort();
        Ok(DistributionOutput {
            mapping,
            archives,
            published,
        })
    }

    /// Pack a plugin into a staging directory and zip it as `<dir>/...`.
    fn publish(&self, unit: PublishUnit<'_>, paths: &DistributionPaths) -> Result<(PackOutput, PathBuf)> {
        let PublishUnit {
            packer,
            patches,
            plugin,
            dir,
            default_version,
        } = unit;
        let staging = paths.build.join("published").join(dir);
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to remove {}", staging.display()))?;
        }
        let output = packer.pack(&plugin.layout, &staging)?;

        let version = packed_plugin_version(patches, self.resolver, &plugin.layout, default_version)?;
        let zip = paths
            .artifacts
            .join(format!("{}-plugins", self.options.product_code))
            .join(format!("{dir}-{version}.zip"));
        let source = ContentSource::Directory {
            root: staging,
            prefix: dir.to_string(),
            excludes: Vec::new(),
        };
        self.writer
            .write(&zip, &[source], self.options.compress_published_plugins)
            .with_context(|| format!("publishing plugin '{}'", plugin.main_module()))?;
        self.observer.event(
            "plugin published",
            &[
                ("plugin", plugin.main_module().to_string()),
                ("version", version),
                ("zip", zip.display().to_string()),
            ],
        );
        Ok((output, zip))
    }
}

/// One published plugin and what packing it needs.
struct PublishUnit<'u> {
    packer: Packer<'u>,
    patches: &'u OutputPatchSet,
    plugin: &'u PluginEntry,
    dir: &'u str,
    default_version: &'u str,
}

fn collect(collected: &Collected, output: PackOutput) {
    collected.mapping.extend(output.entries);
    collected.archives.lock().extend(output.archives);
}

#[cfg(test)]
mod tests;
