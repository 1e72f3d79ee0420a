//! Read-only lookup of modules, libraries and artifacts.
//!
//! The packer never walks project configuration itself. Everything it needs
//! to know about compiled output is asked through [`Resolver`], which must be
//! safe to share between concurrently packed units.
//!
//! [`ProjectModel`] is the in-memory implementation, built programmatically
//! or loaded from a TOML project description.

mod model;

pub use model::ProjectModel;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;

use crate::error::PackError;

/// Scope of a module's dependency on a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyScope {
    Compile,
    Runtime,
    Test,
    Provided,
}

impl DependencyScope {
    /// Scopes whose libraries are shipped with the module.
    pub const PACKAGED: [DependencyScope; 2] = [DependencyScope::Compile, DependencyScope::Runtime];
}

impl FromStr for DependencyScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compile" => Ok(DependencyScope::Compile),
            "runtime" => Ok(DependencyScope::Runtime),
            "test" => Ok(DependencyScope::Test),
            "provided" => Ok(DependencyScope::Provided),
            other => bail!(
                "unsupported dependency scope '{}' (expected compile, runtime, test or provided)",
                other
            ),
        }
    }
}

/// Whether a library is shared by the project or declared by one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryKind {
    Project,
    Module,
}

/// One library edge of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDependency {
    pub name: String,
    pub kind: LibraryKind,
    pub scope: DependencyScope,
    pub exported: bool,
}

/// Compiled module as seen by the packer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub output_dir: PathBuf,
    /// Carried for resolvers that know it; test output reaches a
    /// distribution only through an artifact's `test_modules`.
    pub test_output_dir: Option<PathBuf>,
    pub content_root: Option<PathBuf>,
    pub libraries: Vec<LibraryDependency>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output_dir: output_dir.into(),
            test_output_dir: None,
            content_root: None,
            libraries: Vec::new(),
        }
    }
}

/// A pre-built artifact copied wholesale into a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: String,
    /// Output file or directory of the artifact.
    pub output: PathBuf,
    /// Modules packaged by the artifact.
    pub modules: Vec<String>,
    /// Modules whose test output is packaged by the artifact.
    pub test_modules: Vec<String>,
    /// Project libraries packaged by the artifact.
    pub libraries: Vec<String>,
}

/// Lookup table over the compiled project.
///
/// Implementations must not change while a build is running.
pub trait Resolver: Send + Sync + fmt::Debug {
    fn module(&self, name: &str) -> Option<&ModuleInfo>;

    /// All files of a project-scoped library.
    fn project_library_files(&self, name: &str) -> Result<Vec<PathBuf>, PackError>;

    /// All files of the library `name` declared by `module`.
    fn module_library_files(&self, module: &str, name: &str) -> Result<Vec<PathBuf>, PackError>;

    fn artifact(&self, name: &str) -> Option<&ArtifactInfo>;

    fn require_module(&self, name: &str) -> Result<&ModuleInfo, PackError> {
        self.module(name).ok_or_else(|| PackError::MissingModule {
            name: name.to_string(),
        })
    }

    fn module_output_dir(&self, name: &str) -> Result<PathBuf, PackError> {
        Ok(self.require_module(name)?.output_dir.clone())
    }

    /// Library edges of `name` restricted to `scopes`, in declaration order.
    fn module_libraries(
        &self,
        name: &str,
        scopes: &[DependencyScope],
    ) -> Result<Vec<LibraryDependency>, PackError> {
        Ok(self
            .require_module(name)?
            .libraries
            .iter()
            .filter(|dep| scopes.contains(&dep.scope))
            .cloned()
            .collect())
    }

    /// Content root of a module, falling back to the parent of its output.
    fn module_content_root(&self, name: &str) -> Result<PathBuf, PackError> {
        let module = self.require_module(name)?;
        Ok(module.content_root.clone().unwrap_or_else(|| {
            module
                .output_dir
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| module.output_dir.clone())
        }))
    }

    fn require_artifact(&self, name: &str) -> Result<&ArtifactInfo, PackError> {
        self.artifact(name).ok_or_else(|| PackError::MissingArtifact {
            name: name.to_string(),
        })
    }
}
