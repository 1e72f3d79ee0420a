//! Layout model: what one distributable unit contains.
//!
//! A [`Layout`] describes either the platform or one plugin: which modules
//! go into which archive, which libraries are bundled and how, which files are
//! excluded and which extra artifacts and resources are copied.
//!
//! Layouts are assembled with a [`LayoutBuilder`]. Every builder call checks
//! its precondition against what has been configured so far, so a broken
//! layout definition fails where it is written and not halfway through a
//! build. Once built, a layout is never mutated.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut builder = LayoutBuilder::platform("app.jar");
//! builder
//!     .with_module_in_main_archive("core")?
//!     .with_module_in_main_archive("ui")?
//!     .with_project_library(ProjectLibraryData::new("gson", PackMode::StandaloneSeparate))?;
//! let layout = builder.build();
//! ```

pub mod bundling;
pub mod hooks;
pub mod naming;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;

use crate::error::PackError;
use bundling::BundlingRestrictions;
use hooks::{LayoutPatcher, ResourceGenerator};
use naming::module_file_name;

/// How a project library's files are packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PackMode {
    /// Into the unit's main archive, if the library may be merged.
    #[default]
    Merged,
    /// All files of the library into one archive named after it.
    StandaloneMerged,
    /// Every file of the library as its own archive.
    StandaloneSeparate,
    /// Like `StandaloneSeparate`, with version suffixes stripped.
    StandaloneSeparateNoVersion,
}

impl FromStr for PackMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "merged" => Ok(PackMode::Merged),
            "standalone_merged" => Ok(PackMode::StandaloneMerged),
            "standalone_separate" => Ok(PackMode::StandaloneSeparate),
            "standalone_separate_no_version" => Ok(PackMode::StandaloneSeparateNoVersion),
            other => bail!(
                "unsupported pack mode '{}' (expected merged, standalone_merged, standalone_separate or standalone_separate_no_version)",
                other
            ),
        }
    }
}

/// Packing instructions for one project library.
///
/// Two values with the same name are the same library.
#[derive(Debug, Clone)]
pub struct ProjectLibraryData {
    pub name: String,
    /// Archive name (`*.jar`, `*.zip`) or sub-directory under `lib`.
    pub output_subpath: Option<String>,
    pub pack_mode: PackMode,
    pub reason: Option<String>,
}

impl ProjectLibraryData {
    pub fn new(name: impl Into<String>, pack_mode: PackMode) -> Self {
        Self {
            name: name.into(),
            output_subpath: None,
            pack_mode,
            reason: None,
        }
    }

    pub fn with_output_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.output_subpath = Some(subpath.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl PartialEq for ProjectLibraryData {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ProjectLibraryData {}

impl Hash for ProjectLibraryData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A module-scoped library placed at a custom path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleLibraryData {
    pub module_name: String,
    pub library_name: String,
    /// Archive name to merge into, or directory under `lib`.
    pub relative_output_path: String,
}

/// A file or directory of a module copied into the unit directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    pub module: String,
    /// Relative to the module's content root.
    pub source: String,
    /// Relative to the unit directory.
    pub target: String,
    pub pack_to_zip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Platform,
    Plugin,
}

/// Plugin-only attributes of a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub main_module: String,
    pub directory_name: String,
    pub directory_name_set_explicitly: bool,
    pub version: Option<String>,
    pub bundling: BundlingRestrictions,
}

impl PluginInfo {
    /// Directory name after renamed-module substitution.
    ///
    /// Only a directory name derived from the main module is substituted.
    pub fn actual_directory_name(&self, renamed_modules: &BTreeMap<String, String>) -> String {
        if !self.directory_name_set_explicitly
            && self.directory_name == module_file_name(&self.main_module)
        {
            if let Some(old) = renamed_modules.get(&self.main_module) {
                return old.clone();
            }
        }
        self.directory_name.clone()
    }
}

#[derive(Debug, Clone, Default)]
struct ArchiveAssignment {
    archive: String,
    modules: Vec<String>,
}

/// Immutable description of one distributable unit.
#[derive(Clone)]
pub struct Layout {
    kind: LayoutKind,
    main_archive: String,
    assignments: Vec<ArchiveAssignment>,
    explicit_archives: BTreeSet<String>,
    excluded_paths: BTreeMap<String, Vec<glob::Pattern>>,
    project_libraries: Vec<ProjectLibraryData>,
    module_libraries: Vec<ModuleLibraryData>,
    excluded_module_libraries: BTreeMap<String, BTreeSet<String>>,
    auto_inclusion_disabled: BTreeSet<String>,
    unpacked_libraries: BTreeMap<String, BTreeSet<String>>,
    artifacts: BTreeMap<String, String>,
    resources: Vec<ResourceData>,
    patchers: Vec<Arc<dyn LayoutPatcher>>,
    resource_generators: Vec<Arc<dyn ResourceGenerator>>,
    plugin: Option<PluginInfo>,
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("main_archive", &self.main_archive)
            .field("archives", &self.assignments.len())
            .field("project_libraries", &self.project_libraries.len())
            .finish_non_exhaustive()
    }
}

impl Layout {
    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    /// `platform`, or the main module of a plugin.
    pub fn name(&self) -> &str {
        match &self.plugin {
            Some(plugin) => &plugin.main_module,
            None => "platform",
        }
    }

    /// Archive receiving merged libraries.
    pub fn main_archive(&self) -> &str {
        &self.main_archive
    }

    pub fn plugin(&self) -> Option<&PluginInfo> {
        self.plugin.as_ref()
    }

    /// Archives with their modules, in configuration order.
    pub fn archives(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.assignments
            .iter()
            .map(|a| (a.archive.as_str(), a.modules.as_slice()))
    }

    /// Every assigned module once, in configuration order.
    pub fn included_modules(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.assignments
            .iter()
            .flat_map(|a| a.modules.iter())
            .filter(|m| seen.insert(m.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn is_explicit_archive(&self, archive: &str) -> bool {
        self.explicit_archives.contains(archive)
    }

    pub fn excludes_for(&self, module: &str) -> &[glob::Pattern] {
        self.excluded_paths
            .get(module)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Modules with at least one exclusion pattern.
    pub fn modules_with_excludes(&self) -> impl Iterator<Item = &str> {
        self.excluded_paths.keys().map(String::as_str)
    }

    pub fn project_libraries(&self) -> &[ProjectLibraryData] {
        &self.project_libraries
    }

    pub fn module_libraries(&self) -> &[ModuleLibraryData] {
        &self.module_libraries
    }

    pub fn is_module_library_excluded(&self, module: &str, library: &str) -> bool {
        self.excluded_module_libraries
            .get(module)
            .is_some_and(|libs| libs.contains(library))
    }

    /// True when `library` of `module` is placed through a [`ModuleLibraryData`].
    pub fn is_module_library_placed(&self, module: &str, library: &str) -> bool {
        self.module_libraries
            .iter()
            .any(|d| d.module_name == module && d.library_name == library)
    }

    pub fn library_auto_inclusion_disabled(&self, module: &str) -> bool {
        self.auto_inclusion_disabled.contains(module)
    }

    /// Project libraries exploded into `archive`.
    pub fn libraries_unpacked_into(&self, archive: &str) -> impl Iterator<Item = &str> {
        self.unpacked_libraries
            .get(archive)
            .into_iter()
            .flat_map(|libs| libs.iter().map(String::as_str))
    }

    /// Artifact name to path under `lib`.
    pub fn artifacts(&self) -> &BTreeMap<String, String> {
        &self.artifacts
    }

    pub fn resources(&self) -> &[ResourceData] {
        &self.resources
    }

    pub fn patchers(&self) -> &[Arc<dyn LayoutPatcher>] {
        &self.patchers
    }

    pub fn resource_generators(&self) -> &[Arc<dyn ResourceGenerator>] {
        &self.resource_generators
    }

    /// Archive name after renamed-module substitution.
    ///
    /// An archive derived from a module's default name is written under the
    /// module's old name, unless the archive name was configured explicitly.
    pub fn actual_archive_path(
        &self,
        archive: &str,
        modules: &[String],
        renamed_modules: &BTreeMap<String, String>,
    ) -> String {
        if self.explicit_archives.contains(archive) {
            return archive.to_string();
        }
        for module in modules {
            if archive == format!("{}.jar", module_file_name(module)) {
                if let Some(old) = renamed_modules.get(module) {
                    return format!("{old}.jar");
                }
            }
        }
        archive.to_string()
    }
}

/// Accumulates and validates a [`Layout`].
#[derive(Debug)]
pub struct LayoutBuilder {
    layout: Layout,
}

impl LayoutBuilder {
    fn empty(kind: LayoutKind, main_archive: String, plugin: Option<PluginInfo>) -> Self {
        Self {
            layout: Layout {
                kind,
                main_archive,
                assignments: Vec::new(),
                explicit_archives: BTreeSet::new(),
                excluded_paths: BTreeMap::new(),
                project_libraries: Vec::new(),
                module_libraries: Vec::new(),
                excluded_module_libraries: BTreeMap::new(),
                auto_inclusion_disabled: BTreeSet::new(),
                unpacked_libraries: BTreeMap::new(),
                artifacts: BTreeMap::new(),
                resources: Vec::new(),
                patchers: Vec::new(),
                resource_generators: Vec::new(),
                plugin,
            },
        }
    }

    /// Platform layout whose merged libraries go into `main_archive`.
    pub fn platform(main_archive: impl Into<String>) -> Self {
        let main_archive = main_archive.into();
        let mut builder = Self::empty(LayoutKind::Platform, main_archive.clone(), None);
        builder.layout.explicit_archives.insert(main_archive);
        builder
    }

    /// Plugin layout. The main module goes into `<module-file-name>.jar`,
    /// the plugin directory defaults to `<module-file-name>`.
    pub fn plugin(main_module: impl Into<String>) -> Self {
        let main_module = main_module.into();
        let file_name = module_file_name(&main_module);
        let plugin = PluginInfo {
            main_module: main_module.clone(),
            directory_name: file_name.clone(),
            directory_name_set_explicitly: false,
            version: None,
            bundling: BundlingRestrictions::default(),
        };
        let mut builder = Self::empty(LayoutKind::Plugin, format!("{file_name}.jar"), Some(plugin));
        builder.assign(&main_module, &format!("{file_name}.jar"), false);
        builder
    }

    fn assign(&mut self, module: &str, archive: &str, explicit: bool) {
        if explicit {
            self.layout.explicit_archives.insert(archive.to_string());
        }
        let assignments = &mut self.layout.assignments;
        let index = match assignments.iter().position(|a| a.archive == archive) {
            Some(index) => index,
            None => {
                assignments.push(ArchiveAssignment {
                    archive: archive.to_string(),
                    modules: Vec::new(),
                });
                assignments.len() - 1
            }
        };
        let modules = &mut assignments[index].modules;
        if !modules.iter().any(|m| m == module) {
            modules.push(module.to_string());
        }
    }

    fn check_assignment(&self, module: &str, archive: &str) -> Result<(), PackError> {
        for assignment in &self.layout.assignments {
            if assignment.archive == archive || !assignment.modules.iter().any(|m| m == module) {
                continue;
            }
            if !assignment.archive.contains('/') && !archive.contains('/') {
                return Err(PackError::LayoutConflict {
                    subject: module.to_string(),
                    first: assignment.archive.clone(),
                    second: archive.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Put `module` into `archive` (relative to `lib`).
    ///
    /// A module may only live in two archives if one of them is in a
    /// sub-directory. Repeating an existing assignment is a no-op.
    pub fn with_module(&mut self, module: &str, archive: &str) -> Result<&mut Self, PackError> {
        self.check_assignment(module, archive)?;
        self.assign(module, archive, true);
        Ok(self)
    }

    /// Put `module` into the unit's main archive.
    pub fn with_module_in_main_archive(&mut self, module: &str) -> Result<&mut Self, PackError> {
        let archive = self.layout.main_archive.clone();
        self.check_assignment(module, &archive)?;
        let explicit = self.layout.kind == LayoutKind::Platform;
        self.assign(module, &archive, explicit);
        Ok(self)
    }

    /// Exclude files matching `pattern` (relative to the module output) from
    /// every archive the module is packed into.
    pub fn exclude_from_module(&mut self, module: &str, pattern: &str) -> Result<&mut Self, PackError> {
        let compiled = glob::Pattern::new(pattern).map_err(|e| PackError::InvalidPattern {
            module: module.to_string(),
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })?;
        let patterns = self
            .layout
            .excluded_paths
            .entry(module.to_string())
            .or_default();
        if !patterns.iter().any(|p| p.as_str() == pattern) {
            patterns.push(compiled);
        }
        Ok(self)
    }

    pub fn with_project_library(&mut self, data: ProjectLibraryData) -> Result<&mut Self, PackError> {
        if self.layout.project_libraries.contains(&data) {
            return Err(PackError::DuplicateLibrary { name: data.name });
        }
        self.layout.project_libraries.push(data);
        Ok(self)
    }

    pub fn with_module_library(&mut self, data: ModuleLibraryData) -> &mut Self {
        if !self.layout.module_libraries.contains(&data) {
            self.layout.module_libraries.push(data);
        }
        self
    }

    pub fn exclude_module_library(&mut self, module: &str, library: &str) -> &mut Self {
        self.layout
            .excluded_module_libraries
            .entry(module.to_string())
            .or_default()
            .insert(library.to_string());
        self
    }

    pub fn without_library_auto_inclusion(&mut self, module: &str) -> &mut Self {
        self.layout.auto_inclusion_disabled.insert(module.to_string());
        self
    }

    /// Explode the files of project library `library` into `archive`.
    pub fn unpack_library_into(&mut self, library: &str, archive: &str) -> &mut Self {
        self.layout
            .unpacked_libraries
            .entry(archive.to_string())
            .or_default()
            .insert(library.to_string());
        self
    }

    /// Copy artifact `name` to `relative_path` under `lib`.
    pub fn with_artifact(&mut self, name: &str, relative_path: &str) -> &mut Self {
        self.layout
            .artifacts
            .insert(name.to_string(), relative_path.to_string());
        self
    }

    pub fn with_resource(&mut self, resource: ResourceData) -> &mut Self {
        self.layout.resources.push(resource);
        self
    }

    pub fn with_patcher(&mut self, patcher: Arc<dyn LayoutPatcher>) -> &mut Self {
        self.layout.patchers.push(patcher);
        self
    }

    pub fn with_resource_generator(&mut self, generator: Arc<dyn ResourceGenerator>) -> &mut Self {
        self.layout.resource_generators.push(generator);
        self
    }

    fn plugin_mut(&mut self, setting: &str) -> Result<&mut PluginInfo, PackError> {
        self.layout
            .plugin
            .as_mut()
            .ok_or_else(|| PackError::NotAPlugin {
                setting: setting.to_string(),
            })
    }

    pub fn directory_name(&mut self, name: &str) -> Result<&mut Self, PackError> {
        let plugin = self.plugin_mut("directory_name")?;
        plugin.directory_name = name.to_string();
        plugin.directory_name_set_explicitly = true;
        Ok(self)
    }

    pub fn version(&mut self, version: &str) -> Result<&mut Self, PackError> {
        self.plugin_mut("version")?.version = Some(version.to_string());
        Ok(self)
    }

    pub fn bundling(&mut self, restrictions: BundlingRestrictions) -> Result<&mut Self, PackError> {
        self.plugin_mut("bundling")?.bundling = restrictions;
        Ok(self)
    }

    pub fn build(self) -> Layout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_top_level_archives_rejected_in_both_orders() {
        let mut builder = LayoutBuilder::platform("app.jar");
        builder.with_module("core", "a.jar").unwrap();
        let err = builder.with_module("core", "b.jar").unwrap_err();
        assert_eq!(
            err,
            PackError::LayoutConflict {
                subject: "core".into(),
                first: "a.jar".into(),
                second: "b.jar".into()
            }
        );

        let mut builder = LayoutBuilder::platform("app.jar");
        builder.with_module("core", "b.jar").unwrap();
        assert!(matches!(
            builder.with_module("core", "a.jar"),
            Err(PackError::LayoutConflict { .. })
        ));
    }

    #[test]
    fn test_nested_archive_may_repeat_module() {
        let mut builder = LayoutBuilder::platform("app.jar");
        builder
            .with_module("core", "app.jar")
            .unwrap()
            .with_module("core", "ext/core-private.jar")
            .unwrap();
        let layout = builder.build();
        assert_eq!(layout.archives().count(), 2);
    }

    #[test]
    fn test_repeated_assignment_is_noop() {
        let mut builder = LayoutBuilder::platform("app.jar");
        builder.with_module("core", "app.jar").unwrap();
        builder.with_module("core", "app.jar").unwrap();
        builder.with_module_in_main_archive("core").unwrap();
        let layout = builder.build();
        let archives: Vec<_> = layout.archives().collect();
        assert_eq!(archives, vec![("app.jar", &["core".to_string()][..])]);
    }

    #[test]
    fn test_duplicate_project_library() {
        let mut builder = LayoutBuilder::platform("app.jar");
        builder
            .with_project_library(ProjectLibraryData::new("gson", PackMode::Merged))
            .unwrap();
        let err = builder
            .with_project_library(
                ProjectLibraryData::new("gson", PackMode::StandaloneSeparate).with_reason("again"),
            )
            .unwrap_err();
        assert_eq!(err, PackError::DuplicateLibrary { name: "gson".into() });
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let mut builder = LayoutBuilder::platform("app.jar");
        builder.exclude_from_module("core", "**/*.png").unwrap();
        assert!(matches!(
            builder.exclude_from_module("core", "a[b"),
            Err(PackError::InvalidPattern { .. })
        ));
        let layout = builder.build();
        assert!(layout.excludes_for("core")[0].matches("icons/a.png"));
        assert!(layout.excludes_for("ui").is_empty());
    }

    #[test]
    fn test_plugin_defaults_and_renamed_modules() {
        let mut builder = LayoutBuilder::plugin("intellij.vcs.git");
        builder.with_module("intellij.vcs.git.rt", "git4idea-rt.jar").unwrap();
        let layout = builder.build();

        assert_eq!(layout.main_archive(), "intellij-vcs-git.jar");
        assert_eq!(layout.name(), "intellij.vcs.git");
        assert!(!layout.is_explicit_archive("intellij-vcs-git.jar"));
        assert!(layout.is_explicit_archive("git4idea-rt.jar"));

        let renamed = BTreeMap::from([("intellij.vcs.git".to_string(), "git4idea".to_string())]);
        let modules = vec!["intellij.vcs.git".to_string()];
        assert_eq!(
            layout.actual_archive_path("intellij-vcs-git.jar", &modules, &renamed),
            "git4idea.jar"
        );
        assert_eq!(
            layout.plugin().unwrap().actual_directory_name(&renamed),
            "git4idea"
        );
    }

    #[test]
    fn test_explicit_directory_name_is_not_substituted() {
        let mut builder = LayoutBuilder::plugin("intellij.vcs.git");
        builder.directory_name("git").unwrap().version("1.2").unwrap();
        let layout = builder.build();
        let renamed = BTreeMap::from([("intellij.vcs.git".to_string(), "git4idea".to_string())]);
        assert_eq!(layout.plugin().unwrap().actual_directory_name(&renamed), "git");
        assert_eq!(layout.plugin().unwrap().version.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_plugin_settings_rejected_on_platform() {
        let mut builder = LayoutBuilder::platform("app.jar");
        assert_eq!(
            builder.directory_name("x").err(),
            Some(PackError::NotAPlugin {
                setting: "directory_name".into()
            })
        );
    }

    #[test]
    fn test_pack_mode_parse() {
        assert_eq!(
            "standalone-separate-no-version".parse::<PackMode>().unwrap(),
            PackMode::StandaloneSeparateNoVersion
        );
        assert!("exploded".parse::<PackMode>().is_err());
    }
}
