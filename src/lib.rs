//! Assembles the installable distribution of a modular application from
//! compiled module output and third-party libraries.
//!
//! The crate decides which compiled modules go into which archive, merges or
//! keeps separate each library according to its pack mode, overlays patched
//! files without touching the compiler output, and attributes every byte of
//! every written archive to the module or library that produced it.
//!
//! - **Layout model** - Immutable description of the platform or one plugin
//! - **Packing engine** - Layout x resolver x patches into archives and mapping entries
//! - **Output patcher** - In-memory overlay keyed by module and path
//! - **Descriptor patcher** - Version and compatibility range of every plugin
//! - **Orchestrator** - Run-all-settled task graph on a rayon pool
//! - **Distribution builder** - Platform, bundled, OS-specific and published plugins
//!
//! # Architecture
//!
//! ```text
//! config (TOML) ──> DistributionPlan ──> DistributionBuilder
//!                                             │
//!                                             ├── Orchestrator (one task per unit)
//!                                             │
//!                                             └── Packer ──> ArchiveWriter (zip)
//!                                                   │
//!                                                   ├── Resolver (modules, libraries)
//!                                                   ├── OutputPatchSet
//!                                                   └── StructureMapping ──> report
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dist_assembler::artifact::ZipArchiveWriter;
//! use dist_assembler::layout::{LayoutBuilder, PackMode, ProjectLibraryData};
//! use dist_assembler::{BuildOptions, NullObserver, OutputPatchSet, Packer, ProjectModel};
//!
//! let model = ProjectModel::load("project.toml".as_ref())?;
//! let mut builder = LayoutBuilder::platform("app.jar");
//! builder
//!     .with_module_in_main_archive("core")?
//!     .with_project_library(ProjectLibraryData::new("gson", PackMode::StandaloneSeparate))?;
//! let layout = builder.build();
//!
//! let patches = OutputPatchSet::new();
//! let options = BuildOptions::default();
//! let packer = Packer::new(&model, &patches, &ZipArchiveWriter, &NullObserver, &options);
//! let output = packer.pack(&layout, "out/dist".as_ref())?;
//! ```

pub mod artifact;
pub mod config;
pub mod descriptor;
pub mod distribution;
pub mod error;
pub mod layout;
pub mod mapping;
pub mod observer;
pub mod orchestrator;
pub mod packer;
pub mod patch;
pub mod resolver;

pub use config::{load_build_config, load_layouts, BuildOptions};
pub use descriptor::PluginDescriptorPatcher;
pub use distribution::{DistributionBuilder, DistributionPaths, DistributionPlan, PluginEntry};
pub use error::{BuildFailures, PackError};
pub use layout::{Layout, LayoutBuilder, PackMode};
pub use mapping::{ContributorKind, MappingEntry, StructureMapping};
pub use observer::{BuildObserver, NullObserver, RecordingObserver, TracingObserver};
pub use orchestrator::{Orchestrator, TaskHandle, TaskStatus};
pub use packer::{PackOutput, Packer};
pub use patch::OutputPatchSet;
pub use resolver::{ProjectModel, Resolver};
