//! TOML configuration: build options and layout definitions.
//!
//! Raw `*Toml` structs mirror the files one to one and reject unknown keys.
//! They are validated and turned into domain values here, so the rest of the
//! crate never sees unchecked configuration. Layouts are built through
//! [`LayoutBuilder`], which means a conflicting layout file fails to load.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::distribution::{DistributionPlan, PluginEntry};
use crate::layout::bundling::{Arch, BundlingRestrictions, OsFamily, Target};
use crate::layout::{LayoutBuilder, ModuleLibraryData, PackMode, ProjectLibraryData, ResourceData};

/// File-name suffixes of library files that are loaded by name at runtime.
pub const DEFAULT_RUNTIME_HELPER_SUFFIXES: &[&str] = &["-agent.jar", "-rt.jar"];

/// Settings of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Worker threads of the build pool.
    pub parallelism: usize,
    /// `false` runs every step on the calling thread.
    pub run_in_parallel: bool,
    /// Step ids that are not executed.
    pub steps_to_skip: BTreeSet<String>,
    pub compress_archives: bool,
    pub compress_published_plugins: bool,
    pub build_number: String,
    pub product_code: String,
    pub eap: bool,
    /// OS/arch combinations that get their own plugin directories.
    pub targets: Vec<Target>,
    /// Project libraries allowed to stay merged into a main archive.
    pub mergeable_libraries: BTreeSet<String>,
    pub runtime_helper_suffixes: Vec<String>,
    /// Current module name to the name its archive used to have.
    pub renamed_modules: BTreeMap<String, String>,
    pub bundled_plugin_dirs_to_skip: BTreeSet<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            run_in_parallel: true,
            steps_to_skip: BTreeSet::new(),
            compress_archives: true,
            compress_published_plugins: true,
            build_number: "SNAPSHOT".to_string(),
            product_code: "app".to_string(),
            eap: false,
            targets: Vec::new(),
            mergeable_libraries: BTreeSet::new(),
            runtime_helper_suffixes: DEFAULT_RUNTIME_HELPER_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            renamed_modules: BTreeMap::new(),
            bundled_plugin_dirs_to_skip: BTreeSet::new(),
        }
    }
}

impl BuildOptions {
    pub fn is_step_skipped(&self, step: &str) -> bool {
        self.steps_to_skip.contains(step)
    }

    pub fn is_runtime_helper(&self, file_name: &str) -> bool {
        self.runtime_helper_suffixes
            .iter()
            .any(|suffix| file_name.ends_with(suffix.as_str()))
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildConfigToml {
    build: BuildToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    parallelism: Option<usize>,
    run_in_parallel: Option<bool>,
    steps_to_skip: Option<Vec<String>>,
    compress_archives: Option<bool>,
    compress_published_plugins: Option<bool>,
    build_number: Option<String>,
    product_code: Option<String>,
    eap: Option<bool>,
    #[serde(default, rename = "target")]
    targets: Vec<TargetToml>,
    mergeable_libraries: Option<Vec<String>>,
    runtime_helper_suffixes: Option<Vec<String>>,
    renamed_modules: Option<BTreeMap<String, String>>,
    bundled_plugin_dirs_to_skip: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetToml {
    os: String,
    arch: String,
}

/// Load `[build]` options from a TOML file.
pub fn load_build_config(path: &Path) -> Result<BuildOptions> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading build config '{}'", path.display()))?;
    let parsed: BuildConfigToml = toml::from_str(&text)
        .with_context(|| format!("parsing build config '{}'", path.display()))?;
    let build = parsed.build;
    let defaults = BuildOptions::default();

    let parallelism = build.parallelism.unwrap_or(defaults.parallelism);
    if parallelism == 0 {
        bail!(
            "invalid build config '{}': parallelism must be at least 1",
            path.display()
        );
    }

    let mut targets = Vec::with_capacity(build.targets.len());
    for target in &build.targets {
        let os: OsFamily = target
            .os
            .parse()
            .with_context(|| format!("invalid build config '{}'", path.display()))?;
        let arch: Arch = target
            .arch
            .parse()
            .with_context(|| format!("invalid build config '{}'", path.display()))?;
        let target = Target { os, arch };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    let product_code = build
        .product_code
        .map(|code| code.trim().to_string())
        .unwrap_or(defaults.product_code);
    if product_code.is_empty() || product_code.contains('/') {
        bail!(
            "invalid build config '{}': product_code must be a non-empty file name",
            path.display()
        );
    }

    Ok(BuildOptions {
        parallelism,
        run_in_parallel: build.run_in_parallel.unwrap_or(defaults.run_in_parallel),
        steps_to_skip: normalized(build.steps_to_skip),
        compress_archives: build.compress_archives.unwrap_or(defaults.compress_archives),
        compress_published_plugins: build
            .compress_published_plugins
            .unwrap_or(defaults.compress_published_plugins),
        build_number: build.build_number.unwrap_or(defaults.build_number),
        product_code,
        eap: build.eap.unwrap_or(defaults.eap),
        targets,
        mergeable_libraries: build
            .mergeable_libraries
            .unwrap_or_default()
            .into_iter()
            .collect(),
        runtime_helper_suffixes: build
            .runtime_helper_suffixes
            .unwrap_or(defaults.runtime_helper_suffixes),
        renamed_modules: build.renamed_modules.unwrap_or_default(),
        bundled_plugin_dirs_to_skip: normalized(build.bundled_plugin_dirs_to_skip),
    })
}

fn normalized(values: Option<Vec<String>>) -> BTreeSet<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutsToml {
    platform: UnitToml,
    #[serde(default, rename = "plugin")]
    plugins: Vec<UnitToml>,
}

/// Shared shape of the platform and plugin sections. Plugin-only keys are
/// rejected on the platform while validating.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitToml {
    main_archive: Option<String>,
    main_module: Option<String>,
    directory_name: Option<String>,
    version: Option<String>,
    bundled: Option<bool>,
    published: Option<bool>,
    os: Option<Vec<String>>,
    arch: Option<Vec<String>>,
    eap_only: Option<bool>,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default, rename = "archive")]
    archives: Vec<ArchiveToml>,
    #[serde(default, rename = "exclude")]
    excludes: Vec<ExcludeToml>,
    #[serde(default, rename = "project_library")]
    project_libraries: Vec<ProjectLibraryToml>,
    #[serde(default, rename = "module_library")]
    module_libraries: Vec<ModuleLibraryToml>,
    #[serde(default)]
    excluded_module_libraries: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    without_library_auto_inclusion: Vec<String>,
    #[serde(default, rename = "unpack")]
    unpacked: Vec<UnpackToml>,
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArchiveToml {
    name: String,
    modules: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExcludeToml {
    module: String,
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectLibraryToml {
    name: String,
    mode: Option<String>,
    output_subpath: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleLibraryToml {
    module: String,
    library: String,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnpackToml {
    library: String,
    archive: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceToml {
    module: String,
    source: String,
    target: String,
    #[serde(default)]
    zip: bool,
}

/// Load the platform and plugin layouts of a product.
pub fn load_layouts(path: &Path) -> Result<DistributionPlan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading layouts '{}'", path.display()))?;
    let parsed: LayoutsToml = toml::from_str(&text)
        .with_context(|| format!("parsing layouts '{}'", path.display()))?;

    let platform_toml = parsed.platform;
    if platform_toml.main_module.is_some()
        || platform_toml.directory_name.is_some()
        || platform_toml.version.is_some()
        || platform_toml.bundled.is_some()
        || platform_toml.published.is_some()
        || platform_toml.os.is_some()
        || platform_toml.arch.is_some()
        || platform_toml.eap_only.is_some()
    {
        bail!(
            "invalid layouts '{}': platform section only accepts layout keys, not plugin settings",
            path.display()
        );
    }
    let main_archive = platform_toml.main_archive.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "invalid layouts '{}': platform.main_archive is required",
            path.display()
        )
    })?;
    let mut platform = LayoutBuilder::platform(main_archive);
    apply_unit(&mut platform, &platform_toml)
        .with_context(|| format!("invalid platform layout in '{}'", path.display()))?;

    let mut plugins = Vec::with_capacity(parsed.plugins.len());
    for plugin_toml in parsed.plugins {
        let main_module = plugin_toml.main_module.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "invalid layouts '{}': every plugin needs a main_module",
                path.display()
            )
        })?;
        if plugin_toml.main_archive.is_some() {
            bail!(
                "invalid layouts '{}': plugin '{}' cannot set main_archive",
                path.display(),
                main_module
            );
        }
        let entry = plugin_entry(&main_module, &plugin_toml)
            .with_context(|| format!("invalid plugin '{}' in '{}'", main_module, path.display()))?;
        plugins.push(entry);
    }

    Ok(DistributionPlan::new(platform.build(), plugins)?)
}

fn plugin_entry(main_module: &str, unit: &UnitToml) -> Result<PluginEntry> {
    let mut builder = LayoutBuilder::plugin(main_module);
    if let Some(directory) = &unit.directory_name {
        builder.directory_name(directory)?;
    }
    if let Some(version) = &unit.version {
        builder.version(version)?;
    }

    let supported_os = unit
        .os
        .iter()
        .flatten()
        .map(|os| os.parse())
        .collect::<Result<Vec<OsFamily>>>()?;
    let supported_arch = unit
        .arch
        .iter()
        .flatten()
        .map(|arch| arch.parse())
        .collect::<Result<Vec<Arch>>>()?;
    builder.bundling(BundlingRestrictions {
        supported_os,
        supported_arch,
        include_in_eap_only: unit.eap_only.unwrap_or(false),
    })?;

    apply_unit(&mut builder, unit)?;
    Ok(PluginEntry {
        layout: builder.build(),
        bundled: unit.bundled.unwrap_or(true),
        published: unit.published.unwrap_or(false),
    })
}

fn apply_unit(builder: &mut LayoutBuilder, unit: &UnitToml) -> Result<()> {
    for module in &unit.modules {
        builder.with_module_in_main_archive(module)?;
    }
    for archive in &unit.archives {
        for module in &archive.modules {
            builder.with_module(module, &archive.name)?;
        }
    }
    for exclude in &unit.excludes {
        builder.exclude_from_module(&exclude.module, &exclude.pattern)?;
    }
    for library in &unit.project_libraries {
        let mode = match &library.mode {
            Some(mode) => mode
                .parse()
                .with_context(|| format!("project library '{}'", library.name))?,
            None => PackMode::default(),
        };
        let mut data = ProjectLibraryData::new(library.name.clone(), mode);
        data.output_subpath = library.output_subpath.clone();
        data.reason = library.reason.clone();
        builder.with_project_library(data)?;
    }
    for library in &unit.module_libraries {
        builder.with_module_library(ModuleLibraryData {
            module_name: library.module.clone(),
            library_name: library.library.clone(),
            relative_output_path: library.path.clone(),
        });
    }
    for (module, libraries) in &unit.excluded_module_libraries {
        for library in libraries {
            builder.exclude_module_library(module, library);
        }
    }
    for module in &unit.without_library_auto_inclusion {
        builder.without_library_auto_inclusion(module);
    }
    for unpack in &unit.unpacked {
        builder.unpack_library_into(&unpack.library, &unpack.archive);
    }
    for (name, relative_path) in &unit.artifacts {
        builder.with_artifact(name, relative_path);
    }
    for resource in &unit.resources {
        builder.with_resource(ResourceData {
            module: resource.module.clone(),
            source: resource.source.clone(),
            target: resource.target.clone(),
            pack_to_zip: resource.zip,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PackError;
    use tempfile::TempDir;

    fn write(temp: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_build_config_defaults() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "build.toml", "[build]\n");
        let options = load_build_config(&path).unwrap();
        assert!(options.run_in_parallel);
        assert!(options.parallelism >= 1);
        assert!(options.is_runtime_helper("debugger-agent.jar"));
        assert!(!options.is_runtime_helper("gson.jar"));
    }

    #[test]
    fn test_build_config_full() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "build.toml",
            r#"
[build]
parallelism = 3
run_in_parallel = false
steps_to_skip = ["report", " "]
build_number = "241.100"
product_code = "idea"
eap = true
mergeable_libraries = ["jna"]
runtime_helper_suffixes = ["-helper.jar"]
bundled_plugin_dirs_to_skip = ["android"]

[[build.target]]
os = "linux"
arch = "x64"

[[build.target]]
os = "linux"
arch = "x64"

[build.renamed_modules]
"intellij.vcs.git" = "git4idea"
"#,
        );
        let options = load_build_config(&path).unwrap();
        assert_eq!(options.parallelism, 3);
        assert!(!options.run_in_parallel);
        assert!(options.is_step_skipped("report"));
        assert_eq!(options.steps_to_skip.len(), 1);
        assert_eq!(options.targets.len(), 1);
        assert!(options.mergeable_libraries.contains("jna"));
        assert!(options.is_runtime_helper("x-helper.jar"));
        assert!(!options.is_runtime_helper("x-agent.jar"));
        assert_eq!(options.renamed_modules["intellij.vcs.git"], "git4idea");
    }

    #[test]
    fn test_build_config_rejects_unknown_keys_and_zero_parallelism() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "build.toml", "[build]\nthreads = 4\n");
        assert!(load_build_config(&path).is_err());

        let path = write(&temp, "build.toml", "[build]\nparallelism = 0\n");
        let err = load_build_config(&path).unwrap_err();
        assert!(err.to_string().contains("parallelism must be at least 1"));
    }

    #[test]
    fn test_load_layouts() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "layouts.toml",
            r#"
[platform]
main_archive = "app.jar"
modules = ["core", "ui"]

[[platform.project_library]]
name = "gson"
mode = "standalone_separate"

[[platform.exclude]]
module = "core"
pattern = "**/*.png"

[[plugin]]
main_module = "intellij.vcs.git"
version = "1.0"
os = ["linux"]
published = true

[[plugin.archive]]
name = "git4idea-rt.jar"
modules = ["intellij.vcs.git.rt"]
"#,
        );
        let plan = load_layouts(&path).unwrap();
        let archives: Vec<_> = plan.platform.archives().map(|(a, m)| (a, m.len())).collect();
        assert_eq!(archives, vec![("app.jar", 2)]);
        assert_eq!(plan.platform.project_libraries()[0].pack_mode, PackMode::StandaloneSeparate);

        let git = &plan.plugins[0];
        assert!(git.bundled && git.published);
        let info = git.layout.plugin().unwrap();
        assert_eq!(info.bundling.supported_os, vec![OsFamily::Linux]);
        assert_eq!(git.layout.archives().count(), 2);
    }

    #[test]
    fn test_load_layouts_surfaces_layout_conflicts() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "layouts.toml",
            r#"
[platform]
main_archive = "app.jar"

[[platform.archive]]
name = "a.jar"
modules = ["core"]

[[platform.archive]]
name = "b.jar"
modules = ["core"]
"#,
        );
        let err = load_layouts(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackError>(),
            Some(PackError::LayoutConflict { .. })
        ));
    }

    #[test]
    fn test_load_layouts_rejects_plugin_keys_on_platform() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "layouts.toml",
            "[platform]\nmain_archive = \"app.jar\"\nversion = \"1\"\n",
        );
        assert!(load_layouts(&path).is_err());
    }
}
