//! Per-layout hooks run by the packer.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::Layout;
use crate::patch::OutputPatchSet;
use crate::resolver::Resolver;

/// What a hook may look at while a unit is being packed.
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    pub layout: &'a Layout,
    pub resolver: &'a dyn Resolver,
    pub build_number: &'a str,
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("layout", &self.layout.name())
            .field("build_number", &self.build_number)
            .finish()
    }
}

/// Stages overrides in the patch set before a plugin is packed.
pub trait LayoutPatcher: Send + Sync + fmt::Debug {
    fn apply(&self, patches: &OutputPatchSet, ctx: &HookContext<'_>) -> Result<()>;
}

/// Produces an extra file or directory to copy into the unit directory.
pub trait ResourceGenerator: Send + Sync + fmt::Debug {
    /// Generate into `scratch_dir` and return the produced path, or `None`
    /// when there is nothing to add for this build.
    fn generate(&self, scratch_dir: &Path, ctx: &HookContext<'_>) -> Result<Option<PathBuf>>;

    /// Path relative to the unit directory the output is copied to.
    fn target(&self) -> &str;
}

/// Writes fixed bytes to a module path; the common "inject a file" patcher.
#[derive(Debug, Clone)]
pub struct StaticPatch {
    pub module: String,
    pub path: String,
    pub data: bytes::Bytes,
    pub overwrite: bool,
}

impl LayoutPatcher for StaticPatch {
    fn apply(&self, patches: &OutputPatchSet, _ctx: &HookContext<'_>) -> Result<()> {
        if self.overwrite {
            patches.set_overwriting(&self.module, &self.path, self.data.clone());
        } else {
            patches.set(&self.module, &self.path, self.data.clone())?;
        }
        Ok(())
    }
}
