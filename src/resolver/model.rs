use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{ArtifactInfo, DependencyScope, LibraryDependency, LibraryKind, ModuleInfo, Resolver};
use crate::error::PackError;

/// In-memory [`Resolver`] over a fixed set of modules and libraries.
#[derive(Debug, Clone, Default)]
pub struct ProjectModel {
    modules: BTreeMap<String, ModuleInfo>,
    project_libraries: BTreeMap<String, Vec<PathBuf>>,
    module_libraries: BTreeMap<(String, String), Vec<PathBuf>>,
    artifacts: BTreeMap<String, ArtifactInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectToml {
    #[serde(default, rename = "module")]
    modules: Vec<ModuleToml>,
    #[serde(default, rename = "library")]
    libraries: Vec<LibraryToml>,
    #[serde(default, rename = "artifact")]
    artifacts: Vec<ArtifactToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleToml {
    name: String,
    output: String,
    test_output: Option<String>,
    content_root: Option<String>,
    #[serde(default, rename = "library")]
    libraries: Vec<ModuleLibraryToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleLibraryToml {
    name: String,
    scope: Option<String>,
    #[serde(default)]
    exported: bool,
    /// Present for module-scoped libraries; absent when the edge points at
    /// a project library.
    files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LibraryToml {
    name: String,
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArtifactToml {
    name: String,
    output: String,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default)]
    test_modules: Vec<String>,
    #[serde(default)]
    libraries: Vec<String>,
}

fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ProjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a project description. Relative paths are resolved against the
    /// directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading project model '{}'", path.display()))?;
        let parsed: ProjectToml = toml::from_str(&text)
            .with_context(|| format!("parsing project model '{}'", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut model = ProjectModel::new();
        for library in parsed.libraries {
            if model.project_libraries.contains_key(&library.name) {
                bail!(
                    "invalid project model '{}': library '{}' is declared twice",
                    path.display(),
                    library.name
                );
            }
            let files = library.files.iter().map(|f| resolve_path(base, f)).collect();
            model.add_project_library(library.name, files);
        }

        for module in parsed.modules {
            if model.modules.contains_key(&module.name) {
                bail!(
                    "invalid project model '{}': module '{}' is declared twice",
                    path.display(),
                    module.name
                );
            }
            let mut info = ModuleInfo::new(module.name.clone(), resolve_path(base, &module.output));
            info.test_output_dir = module.test_output.as_deref().map(|p| resolve_path(base, p));
            info.content_root = module.content_root.as_deref().map(|p| resolve_path(base, p));

            for library in module.libraries {
                let scope = match library.scope.as_deref() {
                    Some(scope) => scope.parse().with_context(|| {
                        format!(
                            "invalid project model '{}': library '{}' of module '{}'",
                            path.display(),
                            library.name,
                            module.name
                        )
                    })?,
                    None => DependencyScope::Compile,
                };
                let kind = match library.files {
                    Some(files) => {
                        let files = files.iter().map(|f| resolve_path(base, f)).collect();
                        model
                            .module_libraries
                            .insert((module.name.clone(), library.name.clone()), files);
                        LibraryKind::Module
                    }
                    None => {
                        if !model.project_libraries.contains_key(&library.name) {
                            bail!(
                                "invalid project model '{}': module '{}' depends on unknown project library '{}'",
                                path.display(),
                                module.name,
                                library.name
                            );
                        }
                        LibraryKind::Project
                    }
                };
                info.libraries.push(LibraryDependency {
                    name: library.name,
                    kind,
                    scope,
                    exported: library.exported,
                });
            }
            model.modules.insert(info.name.clone(), info);
        }

        for artifact in parsed.artifacts {
            model.add_artifact(ArtifactInfo {
                name: artifact.name,
                output: resolve_path(base, &artifact.output),
                modules: artifact.modules,
                test_modules: artifact.test_modules,
                libraries: artifact.libraries,
            });
        }

        Ok(model)
    }

    pub fn add_module(&mut self, module: ModuleInfo) -> &mut Self {
        self.modules.insert(module.name.clone(), module);
        self
    }

    pub fn add_project_library(&mut self, name: impl Into<String>, files: Vec<PathBuf>) -> &mut Self {
        self.project_libraries.insert(name.into(), files);
        self
    }

    /// Declare a module-scoped library and add the dependency edge to the
    /// module, which must already be registered.
    pub fn add_module_library(
        &mut self,
        module: &str,
        name: impl Into<String>,
        scope: DependencyScope,
        files: Vec<PathBuf>,
    ) -> Result<&mut Self, PackError> {
        let name = name.into();
        let info = self
            .modules
            .get_mut(module)
            .ok_or_else(|| PackError::MissingModule {
                name: module.to_string(),
            })?;
        info.libraries.push(LibraryDependency {
            name: name.clone(),
            kind: LibraryKind::Module,
            scope,
            exported: false,
        });
        self.module_libraries.insert((module.to_string(), name), files);
        Ok(self)
    }

    pub fn add_artifact(&mut self, artifact: ArtifactInfo) -> &mut Self {
        self.artifacts.insert(artifact.name.clone(), artifact);
        self
    }
}

impl Resolver for ProjectModel {
    fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    fn project_library_files(&self, name: &str) -> Result<Vec<PathBuf>, PackError> {
        self.project_libraries
            .get(name)
            .cloned()
            .ok_or_else(|| PackError::MissingLibrary {
                name: name.to_string(),
                module: None,
            })
    }

    fn module_library_files(&self, module: &str, name: &str) -> Result<Vec<PathBuf>, PackError> {
        self.module_libraries
            .get(&(module.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| PackError::MissingLibrary {
                name: name.to_string(),
                module: Some(module.to_string()),
            })
    }

    fn artifact(&self, name: &str) -> Option<&ArtifactInfo> {
        self.artifacts.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_project_model() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("project.toml");
        fs::write(
            &path,
            r#"
[[library]]
name = "gson"
files = ["libs/gson-2.10.jar"]

[[module]]
name = "core"
output = "out/core"

[[module.library]]
name = "gson"

[[module.library]]
name = "junit"
scope = "test"
files = ["libs/junit.jar"]

[[artifact]]
name = "help"
output = "out/help.jar"
modules = ["core"]
test_modules = ["core"]
"#,
        )
        .unwrap();

        let model = ProjectModel::load(&path).unwrap();
        assert_eq!(
            model.module_output_dir("core").unwrap(),
            temp.path().join("out/core")
        );
        assert_eq!(
            model.project_library_files("gson").unwrap(),
            vec![temp.path().join("libs/gson-2.10.jar")]
        );

        let packaged = model
            .module_libraries("core", &DependencyScope::PACKAGED)
            .unwrap();
        assert_eq!(packaged.len(), 1);
        assert_eq!(packaged[0].kind, LibraryKind::Project);

        assert!(model.module_library_files("core", "junit").is_ok());
        let help = model.require_artifact("help").unwrap();
        assert_eq!(help.modules, vec!["core"]);
        assert_eq!(help.test_modules, vec!["core"]);
        assert_eq!(
            model.module_content_root("core").unwrap(),
            temp.path().join("out")
        );
    }

    #[test]
    fn test_unknown_entities_are_typed_errors() {
        let model = ProjectModel::new();
        assert_eq!(
            model.module_output_dir("nope").unwrap_err(),
            PackError::MissingModule {
                name: "nope".into()
            }
        );
        assert!(matches!(
            model.module_library_files("core", "gson").unwrap_err(),
            PackError::MissingLibrary { module: Some(_), .. }
        ));
        assert!(matches!(
            model.require_artifact("help").unwrap_err(),
            PackError::MissingArtifact { .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_project_library_reference() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("project.toml");
        fs::write(
            &path,
            r#"
[[module]]
name = "core"
output = "out/core"

[[module.library]]
name = "ghost"
"#,
        )
        .unwrap();

        let err = ProjectModel::load(&path).unwrap_err();
        assert!(err.to_string().contains("unknown project library 'ghost'"));
    }
}
