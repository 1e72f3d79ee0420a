use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use tempfile::TempDir;
use zip::ZipArchive;

use super::*;
use crate::artifact::ZipArchiveWriter;
use crate::error::BuildFailures;
use crate::layout::bundling::{Arch, OsFamily};
use crate::layout::LayoutBuilder;
use crate::observer::{NullObserver, RecordingObserver};
use crate::patch::PLUGIN_DESCRIPTOR;
use crate::resolver::{ModuleInfo, ProjectModel};

struct Product {
    temp: TempDir,
    model: ProjectModel,
}

impl Product {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            model: ProjectModel::new(),
        }
    }

    fn module(&mut self, name: &str, files: &[(&str, &str)]) {
        let out = self.temp.path().join("out").join(name);
        for (rel, content) in files {
            let file = out.join(rel);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        fs::create_dir_all(&out).unwrap();
        self.model.add_module(ModuleInfo::new(name, out));
    }

    fn plugin_module(&mut self, name: &str) {
        self.module(name, &[(PLUGIN_DESCRIPTOR, "<idea-plugin/>"), ("Main.class", name)]);
    }

    fn paths(&self) -> DistributionPaths {
        DistributionPaths::under(self.temp.path().join("build"))
    }
}

fn platform() -> Layout {
    let mut builder = LayoutBuilder::platform("app.jar");
    builder.with_module_in_main_archive("core").unwrap();
    builder.build()
}

fn plugin(main_module: &str, bundled: bool, published: bool) -> PluginEntry {
    PluginEntry {
        layout: LayoutBuilder::plugin(main_module).build(),
        bundled,
        published,
    }
}

fn windows_only(main_module: &str) -> PluginEntry {
    let mut builder = LayoutBuilder::plugin(main_module);
    builder
        .bundling(BundlingRestrictions {
            supported_os: vec![OsFamily::Windows],
            ..BundlingRestrictions::default()
        })
        .unwrap();
    PluginEntry {
        layout: builder.build(),
        bundled: true,
        published: false,
    }
}

fn targets() -> Vec<Target> {
    vec![
        Target {
            os: OsFamily::Windows,
            arch: Arch::X64,
        },
        Target {
            os: OsFamily::Linux,
            arch: Arch::X64,
        },
    ]
}

fn zip_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn packed_descriptor(jar: &Path) -> String {
    let mut archive = ZipArchive::new(File::open(jar).unwrap()).unwrap();
    let mut xml = String::new();
    archive
        .by_name(PLUGIN_DESCRIPTOR)
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

#[test]
fn test_duplicate_plugins_are_rejected() {
    let err = DistributionPlan::new(platform(), vec![plugin("git", true, false), plugin("git", false, true)])
        .unwrap_err();
    assert_eq!(
        err,
        PackError::DuplicatePlugin {
            main_module: "git".into()
        }
    );
}

#[test]
fn test_bundled_plugin_selection() {
    let plan = DistributionPlan::new(
        platform(),
        vec![
            plugin("vcs", true, false),
            windows_only("terminal"),
            plugin("git", true, false),
            plugin("market", false, true),
        ],
    )
    .unwrap();
    let mut options = BuildOptions::default();
    options.bundled_plugin_dirs_to_skip.insert("vcs".into());

    let generic: Vec<_> = plan
        .bundled_plugins(None, &options)
        .iter()
        .map(|p| p.main_module())
        .collect();
    assert_eq!(generic, vec!["git"]);

    let windows: Vec<_> = plan
        .bundled_plugins(Some(targets()[0]), &options)
        .iter()
        .map(|p| p.main_module())
        .collect();
    assert_eq!(windows, vec!["terminal"]);
    assert!(plan.bundled_plugins(Some(targets()[1]), &options).is_empty());

    let published: Vec<_> = plan.published_plugins().iter().map(|p| p.main_module()).collect();
    assert_eq!(published, vec!["market"]);
}

#[test]
fn test_full_distribution_build() {
    let mut product = Product::new();
    product.module("core", &[("Core.class", "core")]);
    product.plugin_module("git");
    product.plugin_module("terminal");
    product.plugin_module("market");

    let mut market = LayoutBuilder::plugin("market");
    market.version("1.2").unwrap();
    let plan = DistributionPlan::new(
        platform(),
        vec![
            plugin("git", true, false),
            windows_only("terminal"),
            PluginEntry {
                layout: market.build(),
                bundled: false,
                published: true,
            },
        ],
    )
    .unwrap();

    let options = BuildOptions {
        parallelism: 2,
        targets: targets(),
        product_code: "idea".into(),
        build_number: "241.100".into(),
        ..BuildOptions::default()
    };
    let observer = RecordingObserver::new();
    let builder = DistributionBuilder::new(&product.model, &ZipArchiveWriter, &observer, &options);
    let paths = product.paths();
    let output = builder.build(&plan, &paths).unwrap();

    assert!(paths.dist.join("lib/app.jar").is_file());
    assert!(paths.dist.join("plugins/git/lib/git.jar").is_file());
    assert!(!paths.dist.join("plugins/terminal").exists());
    assert!(paths
        .build
        .join("dist.win.x64/plugins/terminal/lib/terminal.jar")
        .is_file());
    assert!(!paths.build.join("dist.linux.x64/plugins/terminal").exists());

    let zip = paths.artifacts.join("idea-plugins/market-1.2.zip");
    assert_eq!(output.published, vec![zip.clone()]);
    assert_eq!(zip_names(&zip), vec!["market/lib/market.jar"]);

    assert_eq!(
        output.mapping.included_modules().into_iter().collect::<Vec<_>>(),
        vec!["core", "git", "market", "terminal"]
    );
    assert_eq!(output.archives.len(), 4);
    assert!(output
        .archives
        .iter()
        .any(|a| a.path == paths.build.join("published/market/lib/market.jar")));

    let git = packed_descriptor(&paths.dist.join("plugins/git/lib/git.jar"));
    assert!(git.contains("<version>241.100</version>"));
    assert!(git.contains(r#"<idea-version since-build="241.100" until-build="241.100"/>"#));
    let market = packed_descriptor(&paths.build.join("published/market/lib/market.jar"));
    assert!(market.contains("<version>1.2</version>"));
    assert!(market.contains(r#"until-build="241.*""#));
    // Compiled output is never rewritten.
    assert_eq!(
        fs::read_to_string(product.temp.path().join("out/git").join(PLUGIN_DESCRIPTOR)).unwrap(),
        "<idea-plugin/>"
    );

    let report = fs::read_to_string(paths.artifacts.join("content-mapping.json")).unwrap();
    assert!(report.contains("\"archivePath\": \"dist/lib/app.jar\""));
    assert!(paths.artifacts.join("content.txt").is_file());
    assert!(observer.event_names().contains(&"plugin published".to_string()));
}

#[test]
fn test_published_plugin_feeds_the_mapping() {
    let mut product = Product::new();
    product.module("core", &[("Core.class", "core")]);
    product.module(
        "market",
        &[
            (PLUGIN_DESCRIPTOR, "<idea-plugin><version>3.0</version></idea-plugin>"),
            ("Main.class", "market"),
        ],
    );
    let plan = DistributionPlan::new(platform(), vec![plugin("market", false, true)]).unwrap();

    let options = BuildOptions {
        run_in_parallel: false,
        build_number: "241.SNAPSHOT".into(),
        ..BuildOptions::default()
    };
    let builder = DistributionBuilder::new(&product.model, &ZipArchiveWriter, &NullObserver, &options);
    let paths = product.paths();
    let output = builder.build(&plan, &paths).unwrap();

    assert_eq!(
        output.mapping.included_modules().into_iter().collect::<Vec<_>>(),
        vec!["core", "market"]
    );
    let staged = paths.build.join("published/market/lib/market.jar");
    let archives: Vec<_> = output.archives.iter().map(|a| a.path.clone()).collect();
    assert_eq!(archives, vec![paths.dist.join("lib/app.jar"), staged]);

    // A published plugin keeps the version its descriptor declares.
    assert_eq!(
        output.published,
        vec![paths.artifacts.join("app-plugins/market-3.0.zip")]
    );
    let report = fs::read_to_string(paths.artifacts.join("content-mapping.json")).unwrap();
    assert!(report.contains("\"archivePath\": \"published/market/lib/market.jar\""));
}

#[test]
fn test_snapshot_build_dates_published_plugin_version() {
    let mut product = Product::new();
    product.module("core", &[("Core.class", "core")]);
    product.plugin_module("market");
    let plan = DistributionPlan::new(platform(), vec![plugin("market", false, true)]).unwrap();

    let options = BuildOptions {
        run_in_parallel: false,
        build_number: "241.SNAPSHOT".into(),
        ..BuildOptions::default()
    };
    let builder = DistributionBuilder::new(&product.model, &ZipArchiveWriter, &NullObserver, &options);
    let output = builder.build(&plan, &product.paths()).unwrap();

    let zip = output.published[0].file_name().unwrap().to_string_lossy().into_owned();
    let date = zip
        .strip_prefix("market-241.SNAPSHOT.")
        .and_then(|rest| rest.strip_suffix(".zip"))
        .unwrap();
    assert_eq!(date.len(), 8);
    assert!(date.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_skipped_groups_are_not_built() {
    let mut product = Product::new();
    product.module("core", &[("Core.class", "core")]);
    product.plugin_module("git");
    product.plugin_module("market");
    let plan = DistributionPlan::new(
        platform(),
        vec![plugin("git", true, false), plugin("market", false, true)],
    )
    .unwrap();

    let mut options = BuildOptions {
        run_in_parallel: false,
        ..BuildOptions::default()
    };
    options.steps_to_skip.insert(STEP_PUBLISHED_PLUGINS.into());
    options.steps_to_skip.insert(STEP_REPORT.into());
    let observer = RecordingObserver::new();
    let builder = DistributionBuilder::new(&product.model, &ZipArchiveWriter, &observer, &options);
    let paths = product.paths();
    let output = builder.build(&plan, &paths).unwrap();

    assert!(output.published.is_empty());
    assert!(!paths.artifacts.join("content-mapping.json").exists());
    assert!(paths.dist.join("plugins/git/lib/git.jar").is_file());
    let skipped = observer
        .event_names()
        .iter()
        .filter(|name| *name == "step skipped")
        .count();
    assert_eq!(skipped, 2);
}

#[test]
fn test_failing_plugins_do_not_stop_the_platform() {
    let mut product = Product::new();
    product.module("core", &[("Core.class", "core")]);
    // Neither plugin module carries a descriptor.
    product.module("broken.one", &[("A.class", "a")]);
    product.module("broken.two", &[("B.class", "b")]);
    let plan = DistributionPlan::new(
        platform(),
        vec![plugin("broken.one", true, false), plugin("broken.two", true, false)],
    )
    .unwrap();

    let options = BuildOptions {
        parallelism: 2,
        ..BuildOptions::default()
    };
    let builder = DistributionBuilder::new(&product.model, &ZipArchiveWriter, &NullObserver, &options);
    let paths = product.paths();
    let err = builder.build(&plan, &paths).unwrap_err();

    let failures = err.downcast_ref::<BuildFailures>().unwrap();
    assert_eq!(
        failures.task_names(),
        vec!["bundled-plugins:broken-one", "bundled-plugins:broken-two"]
    );
    assert!(paths.dist.join("lib/app.jar").is_file());
    assert!(!paths.artifacts.join("content-mapping.json").exists());
}
