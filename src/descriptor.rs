//! Plugin descriptor patching.
//!
//! Every plugin packed for a distribution gets the build's version and
//! compatibility range written into its main module's `META-INF/plugin.xml`.
//! The rewritten descriptor is staged in the [`OutputPatchSet`]; the
//! compiled descriptor is never touched.
//!
//! ```text
//! <idea-plugin>
//!   <version>241.100</version>
//!   <idea-version since-build="241.100" until-build="241.100"/>
//!   ...
//! ```

use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::{NoExpand, Regex};
use time::OffsetDateTime;

use crate::config::BuildOptions;
use crate::layout::hooks::{HookContext, LayoutPatcher};
use crate::layout::Layout;
use crate::patch::{OutputPatchSet, PLUGIN_DESCRIPTOR};
use crate::resolver::Resolver;

/// Build numbers ending with this get a dated default plugin version.
pub const SNAPSHOT_SUFFIX: &str = ".SNAPSHOT";

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(source).unwrap_or_else(|e| unreachable!("descriptor pattern is a valid regex: {e}"))
    })
}

fn self_closing_root() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    pattern(&PATTERN, r"<idea-plugin(?P<attrs>[^>]*?)\s*/>")
}

fn root_open_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    pattern(&PATTERN, r"<idea-plugin\b[^>]*>")
}

fn version_element() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    pattern(&PATTERN, r"(?s)<version>(?P<value>.*?)</version>")
}

fn idea_version_element() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    pattern(&PATTERN, r"(?s)<idea-version\b[^>]*?(?:/>|>.*?</idea-version>)")
}

/// Version given to plugins that declare none: the build number, with the
/// UTC build date appended for snapshot builds.
pub fn default_plugin_version(build_number: &str) -> String {
    if !build_number.ends_with(SNAPSHOT_SUFFIX) {
        return build_number.to_string();
    }
    let today = OffsetDateTime::now_utc();
    format!(
        "{build_number}.{:04}{:02}{:02}",
        today.year(),
        today.month() as u8,
        today.day()
    )
}

/// Value of the first `<version>` element, trimmed.
pub fn descriptor_version(xml: &str) -> Option<&str> {
    version_element()
        .captures(xml)
        .and_then(|caps| caps.name("value"))
        .map(|value| value.as_str().trim())
        .filter(|value| !value.is_empty())
}

/// Writes version and compatibility range into plugin descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptorPatcher {
    /// Used when neither the layout nor the descriptor provide a version.
    pub default_version: String,
    pub since_build: String,
    pub until_build: String,
    /// Keep a `<version>` the descriptor already declares. Bundled plugins
    /// always ship with the product's version.
    pub keep_declared_version: bool,
}

impl PluginDescriptorPatcher {
    /// Bundled plugins are pinned to this build; published plugins accept
    /// every build of the branch.
    pub fn new(options: &BuildOptions, default_version: &str, published: bool) -> Self {
        let build = options.build_number.as_str();
        let branch = build.split('.').next().unwrap_or(build);
        let until_build = if published {
            format!("{branch}.*")
        } else {
            build.to_string()
        };
        Self {
            default_version: default_version.to_string(),
            since_build: build.to_string(),
            until_build,
            keep_declared_version: published,
        }
    }

    /// Rewrite `xml`; `layout_version` wins over everything else.
    pub fn rewrite(&self, xml: &str, layout_version: Option<&str>) -> Result<String> {
        let mut xml = self_closing_root()
            .replace(xml, "<idea-plugin$attrs>\n</idea-plugin>")
            .into_owned();
        if !root_open_tag().is_match(&xml) {
            bail!("descriptor has no <idea-plugin> element");
        }

        let declared = descriptor_version(&xml).map(str::to_string);
        let version = match (layout_version, declared) {
            (Some(version), _) => version.to_string(),
            (None, Some(declared)) if self.keep_declared_version => declared,
            _ => self.default_version.clone(),
        };
        let version_tag = format!("<version>{version}</version>");
        if version_element().is_match(&xml) {
            xml = version_element()
                .replacen(&xml, 1, NoExpand(&version_tag))
                .into_owned();
        } else if let Some(open) = root_open_tag().find(&xml) {
            xml.insert_str(open.end(), &format!("\n  {version_tag}"));
        }

        let range = format!(
            r#"<idea-version since-build="{}" until-build="{}"/>"#,
            self.since_build, self.until_build
        );
        if idea_version_element().is_match(&xml) {
            xml = idea_version_element()
                .replacen(&xml, 1, NoExpand(&range))
                .into_owned();
        } else if let Some(version) = version_element().find(&xml) {
            xml.insert_str(version.end(), &format!("\n  {range}"));
        }
        Ok(xml)
    }
}

impl LayoutPatcher for PluginDescriptorPatcher {
    /// Patch the main module's descriptor. A main module without a packed
    /// descriptor is left alone; the descriptor check reports it. So is a
    /// descriptor coming from an overlay directory, which a byte patch could
    /// not shadow.
    fn apply(&self, patches: &OutputPatchSet, ctx: &HookContext<'_>) -> Result<()> {
        let Some(plugin) = ctx.layout.plugin() else {
            return Ok(());
        };
        let module = plugin.main_module.as_str();
        let from_overlay_dir = patches
            .directories_for(module)
            .iter()
            .any(|dir| dir.join(PLUGIN_DESCRIPTOR).is_file());
        if from_overlay_dir {
            return Ok(());
        }

        let excludes = ctx.layout.excludes_for(module);
        let Some(original) = patches.patched_plugin_descriptor(ctx.resolver, module, excludes)? else {
            return Ok(());
        };
        let xml = std::str::from_utf8(&original)
            .with_context(|| format!("descriptor of module '{module}' is not UTF-8"))?;
        let patched = self
            .rewrite(xml, plugin.version.as_deref())
            .with_context(|| format!("patching descriptor of module '{module}'"))?;
        patches.set_overwriting(module, PLUGIN_DESCRIPTOR, patched);
        Ok(())
    }
}

/// Version of a packed plugin as declared by its patched descriptor,
/// falling back to `default_version`.
pub fn packed_plugin_version(
    patches: &OutputPatchSet,
    resolver: &dyn Resolver,
    layout: &Layout,
    default_version: &str,
) -> Result<String> {
    let module = layout.name();
    let descriptor = patches.patched_plugin_descriptor(resolver, module, layout.excludes_for(module))?;
    let version = descriptor
        .as_deref()
        .and_then(|data| std::str::from_utf8(data).ok())
        .and_then(descriptor_version)
        .map(str::to_string);
    Ok(version.unwrap_or_else(|| default_version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(build_number: &str) -> BuildOptions {
        BuildOptions {
            build_number: build_number.to_string(),
            ..BuildOptions::default()
        }
    }

    #[test]
    fn test_empty_descriptor_gets_version_and_range() {
        let patcher = PluginDescriptorPatcher::new(&options("241.100"), "241.100", false);
        let xml = patcher.rewrite("<idea-plugin/>", None).unwrap();
        assert_eq!(
            xml,
            "<idea-plugin>\n  <version>241.100</version>\n  \
             <idea-version since-build=\"241.100\" until-build=\"241.100\"/>\n</idea-plugin>"
        );
        assert_eq!(descriptor_version(&xml), Some("241.100"));
    }

    #[test]
    fn test_existing_elements_are_replaced() {
        let patcher = PluginDescriptorPatcher::new(&options("241.100"), "241.100", true);
        let xml = r#"<idea-plugin url="x">
  <id>market</id>
  <version>0.1</version>
  <idea-version since-build="200"/>
</idea-plugin>"#;

        // Published plugins keep a declared version, the range still moves.
        let kept = patcher.rewrite(xml, None).unwrap();
        assert_eq!(descriptor_version(&kept), Some("0.1"));
        assert!(kept.contains(r#"<idea-version since-build="241.100" until-build="241.*"/>"#));
        assert!(!kept.contains(r#"since-build="200""#));
        assert!(kept.starts_with(r#"<idea-plugin url="x">"#));

        let forced = patcher.rewrite(xml, Some("1.2")).unwrap();
        assert_eq!(descriptor_version(&forced), Some("1.2"));
        assert_eq!(forced.matches("<version>").count(), 1);
    }

    #[test]
    fn test_bundled_plugins_get_the_product_version() {
        let patcher = PluginDescriptorPatcher::new(&options("241.100"), "241.100", false);
        let xml = patcher
            .rewrite("<idea-plugin><version>0.1</version></idea-plugin>", None)
            .unwrap();
        assert_eq!(descriptor_version(&xml), Some("241.100"));
    }

    #[test]
    fn test_not_a_plugin_descriptor() {
        let patcher = PluginDescriptorPatcher::new(&options("241.100"), "241.100", false);
        assert!(patcher.rewrite("<plugin/>", None).is_err());
    }

    #[test]
    fn test_snapshot_builds_get_a_dated_version() {
        assert_eq!(default_plugin_version("241.100"), "241.100");
        let version = default_plugin_version("241.SNAPSHOT");
        let date = version.strip_prefix("241.SNAPSHOT.").unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }
}
