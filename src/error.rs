//! Error taxonomy for layout configuration and packing.
//!
//! Configuration errors surface at definition time (builder calls, config
//! loading). Consistency errors carry both colliding contributors so the
//! culprit can be found without re-running the build. Filesystem and archive
//! failures are reported through `anyhow` with path context instead.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the layout model, the packing engine and the patch set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackError {
    /// A subject (module or archive) was bound to two incompatible targets.
    #[error("layout conflict: '{subject}' is assigned to both '{first}' and '{second}'")]
    LayoutConflict {
        subject: String,
        first: String,
        second: String,
    },

    /// The same project library was included twice in one layout.
    #[error("project library '{name}' is included more than once")]
    DuplicateLibrary { name: String },

    /// An exclusion pattern could not be parsed.
    #[error("invalid exclude pattern '{pattern}' for module '{module}': {message}")]
    InvalidPattern {
        module: String,
        pattern: String,
        message: String,
    },

    /// A plugin-only setting was applied to the platform layout.
    #[error("'{setting}' can only be set on a plugin layout")]
    NotAPlugin { setting: String },

    /// The resolver does not know the module.
    #[error("module '{name}' cannot be resolved")]
    MissingModule { name: String },

    /// The resolver does not know the library.
    #[error("library '{name}'{} cannot be resolved", owner_suffix(.module))]
    MissingLibrary {
        name: String,
        module: Option<String>,
    },

    /// A layout includes an artifact the resolver does not know.
    #[error("artifact '{name}' cannot be found in the project")]
    MissingArtifact { name: String },

    /// A non-overwriting patch targeted an already patched path.
    #[error("output of module '{module}' already has a patch for '{path}'")]
    DuplicatePatch { module: String, path: String },

    /// The same overlay directory was staged twice for one module.
    #[error("directory '{}' is already staged as a patch for module '{module}'", .dir.display())]
    DuplicatePatchDir { module: String, dir: PathBuf },

    /// Two plugin layouts share a main module.
    #[error("plugin layout for module '{main_module}' is already added (duplicated module name?)")]
    DuplicatePlugin { main_module: String },

    /// Excludes were declared for a module that was never compiled.
    #[error("excludes are defined for module '{module}', but the module has no compiled output")]
    ExcludesForMissingOutput { module: String },

    /// No module of a plugin provides the plugin descriptor.
    #[error("no module of plugin '{plugin}' contains META-INF/plugin.xml")]
    MissingPluginDescriptor { plugin: String },

    /// More than one module of a plugin provides the plugin descriptor.
    #[error("modules {} of plugin '{plugin}' all contain META-INF/plugin.xml", .modules.join(", "))]
    MultiplePluginDescriptors { plugin: String, modules: Vec<String> },

    /// The same physical file is claimed by two different libraries.
    #[error("file '{}' is claimed by both {first} and {second}", .file.display())]
    FileOwnershipConflict {
        file: PathBuf,
        first: String,
        second: String,
    },

    /// A contributor reached archive finalization without a measured size.
    #[error("contributor {contributor} of '{archive}' was never measured by the archive writer")]
    UnmeasuredContributor { archive: String, contributor: String },
}

fn owner_suffix(module: &Option<String>) -> String {
    match module {
        Some(module) => format!(" (declared by module '{module}')"),
        None => String::new(),
    }
}

/// One failed task of an orchestrated build.
#[derive(Debug)]
pub struct TaskFailure {
    /// Identifier the task was submitted under.
    pub task: String,
    /// The error the task finished with.
    pub error: anyhow::Error,
}

/// Raised when two or more independent build tasks fail.
///
/// Failures are kept in submission order. A single failing task is reported
/// as its own error instead.
#[derive(Debug, Error)]
#[error("{} build tasks failed:\n{}", .failures.len(), FailureList(.failures))]
pub struct BuildFailures {
    pub failures: Vec<TaskFailure>,
}

impl BuildFailures {
    /// Names of the failed tasks, in submission order.
    pub fn task_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.task.as_str()).collect()
    }
}

struct FailureList<'a>(&'a [TaskFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}: {:#}", failure.task, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_message_names_owner() {
        let err = PackError::MissingLibrary {
            name: "gson".into(),
            module: Some("core".into()),
        };
        assert_eq!(
            err.to_string(),
            "library 'gson' (declared by module 'core') cannot be resolved"
        );

        let err = PackError::MissingLibrary {
            name: "gson".into(),
            module: None,
        };
        assert_eq!(err.to_string(), "library 'gson' cannot be resolved");
    }

    #[test]
    fn test_build_failures_enumerates_every_task() {
        let err = BuildFailures {
            failures: vec![
                TaskFailure {
                    task: "plugin-a".into(),
                    error: anyhow::anyhow!("boom"),
                },
                TaskFailure {
                    task: "plugin-b".into(),
                    error: anyhow::anyhow!("bang"),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 build tasks failed"));
        assert!(message.contains("plugin-a: boom"));
        assert!(message.contains("plugin-b: bang"));
        assert_eq!(err.task_names(), vec!["plugin-a", "plugin-b"]);
    }
}
