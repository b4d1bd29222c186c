// tests/workarea.rs

//! Work-area lifecycle, transformed views, plugin aggregation and
//! plugin-option discovery.

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use common::{config, direct, fp, fpid, producer, TestRepo};
use stevedore::{
    plugin, Error, FeaturePackLayout, FeaturePackLayoutFactory, FeaturePackLocation,
    FeaturePackSpec, FpType, InstallPlugin, ProvisioningLayout, ProvisioningOption, Result,
    StaticPluginRegistry,
};

/// A custom feature-pack layout type for transform tests
struct Tagged {
    location: FeaturePackLocation,
    spec: FeaturePackSpec,
    dir: PathBuf,
    fp_type: FpType,
    tag: &'static str,
}

impl FeaturePackLayout for Tagged {
    fn location(&self) -> &FeaturePackLocation {
        &self.location
    }

    fn spec(&self) -> &FeaturePackSpec {
        &self.spec
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn set_dir(&mut self, dir: PathBuf) {
        self.dir = dir;
    }

    fn fp_type(&self) -> FpType {
        self.fp_type
    }
}

struct TaggedFactory;

impl FeaturePackLayoutFactory for TaggedFactory {
    type Layout = Tagged;

    fn new_feature_pack(
        &self,
        location: FeaturePackLocation,
        spec: FeaturePackSpec,
        dir: PathBuf,
        fp_type: FpType,
    ) -> Result<Tagged> {
        Ok(Tagged {
            location,
            spec,
            dir,
            fp_type,
            tag: "tagged",
        })
    }
}

#[test]
fn test_transform_shares_work_area_with_refcount() {
    let repo = TestRepo::new();
    repo.add(fp("a", "main", "1.0").resource("x", "v1"));

    let mut layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();
    let resource = layout.resource(&["x"]).unwrap();
    assert!(resource.exists());

    let mut view = layout.transform(Rc::new(TaggedFactory)).unwrap();
    assert_eq!(view.feature_pack(&producer("a")).unwrap().tag, "tagged");
    assert_eq!(view.resource(&["x"]).unwrap(), resource);

    // first close: the view still holds the work area
    layout.close();
    assert!(resource.exists());
    assert_eq!(
        fs::read_to_string(view.resource(&["x"]).unwrap()).unwrap(),
        "v1"
    );

    // last close deletes it; further closes are no-ops
    view.close();
    assert!(!resource.exists());
    view.close();
    layout.close();
}

#[test]
fn test_transform_preserves_order_and_patches() {
    let repo = TestRepo::new();
    repo.add(fp("b", "main", "1.0"));
    repo.add(fp("a", "main", "1.0").dep("b:main#1.0").resource("x", "v1"));
    repo.add(
        fp("a-patch", "main", "1.0")
            .patch_for("a:main#1.0")
            .resource("x", "v2"),
    );

    let entry = stevedore::FeaturePackConfig::builder("a:main#1.0".parse().unwrap())
        .add_patch(fpid("a-patch:main#1.0"))
        .build();
    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("b:main#1.0"), entry])).unwrap();
    let view = layout.transform(Rc::new(TaggedFactory)).unwrap();

    let order: Vec<String> = view
        .ordered_feature_packs()
        .map(|f| f.fpid().to_string())
        .collect();
    assert_eq!(order, ["b:main#1.0", "a:main#1.0"]);

    let patches = view.patches(&fpid("a:main#1.0"));
    assert_eq!(patches.len(), 1);
    // the transformed view sees the patched directory
    let a = view.feature_pack(&producer("a")).unwrap();
    assert_eq!(
        fs::read_to_string(a.dir().join("resources/x")).unwrap(),
        "v2"
    );
}

#[test]
fn test_drop_counts_as_close() {
    let repo = TestRepo::new();
    repo.add(fp("a", "main", "1.0").resource("x", "v1"));

    let resource;
    {
        let layout =
            ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();
        resource = layout.resource(&["x"]).unwrap();
        assert!(resource.exists());
    }
    assert!(!resource.exists());
}

#[test]
fn test_staged_dir_and_tmp_path() {
    let repo = TestRepo::new();
    repo.add(fp("a", "main", "1.0"));

    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();

    let staged = layout.new_staged_dir().unwrap();
    fs::write(staged.join("out.txt"), "stale").unwrap();
    let staged = layout.new_staged_dir().unwrap();
    assert_eq!(fs::read_dir(&staged).unwrap().count(), 0);

    let tmp = layout.tmp_path(&["scratch", "notes.txt"]).unwrap();
    assert!(tmp.ends_with("tmp/scratch/notes.txt"));
}

#[test]
fn test_declared_plugins_materialized() {
    let repo = TestRepo::new();
    repo.add_artifact("org.example:wf-plugin:1.0", "plugin-bytes");
    repo.add(
        fp("a", "main", "1.0").plugin("wf-plugin", "test-repo", "org.example:wf-plugin:1.0"),
    );

    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();

    assert!(layout.has_plugins());
    let jar = layout.plugins_dir().unwrap().join("wf-plugin.jar");
    assert_eq!(fs::read_to_string(jar).unwrap(), "plugin-bytes");
}

#[test]
fn test_missing_artifact_resolver() {
    let repo = TestRepo::new();
    repo.add(fp("a", "main", "1.0").plugin("wf-plugin", "nowhere", "org.example:p:1"));

    let err =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap_err();
    assert!(matches!(err, Error::ArtifactResolverMissing(repo_id) if repo_id == "nowhere"));
}

#[test]
fn test_plugins_dir_aggregated_last_writer_wins() {
    let repo = TestRepo::new();
    repo.add(fp("b", "main", "1.0").file("plugins/shared.jar", "from-b"));
    repo.add(
        fp("a", "main", "1.0")
            .dep("b:main#1.0")
            .file("plugins/shared.jar", "from-a"),
    );

    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();

    let shared = layout.plugins_dir().unwrap().join("shared.jar");
    assert_eq!(fs::read_to_string(shared).unwrap(), "from-a");
}

struct ColorPlugin;

impl InstallPlugin for ColorPlugin {
    fn options(&self) -> BTreeMap<String, ProvisioningOption> {
        let mut options = BTreeMap::new();
        options.insert("color".to_string(), ProvisioningOption::new("color"));
        options
    }
}

fn plugin_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.set_plugin_registry(Rc::new(StaticPluginRegistry::new(vec![Rc::new(
        ColorPlugin,
    )])));
    repo.add(fp("a", "main", "1.0").file("plugins/dummy.jar", "x"));
    repo.add(fp("b", "main", "1.0"));
    repo
}

#[test]
fn test_plugin_visitation_installs_ambient_context() {
    let repo = plugin_repo();
    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();

    assert!(plugin::ambient_context().is_none());
    let mut visited = 0;
    layout
        .visit_install_plugins(&mut |p| {
            assert!(plugin::ambient_context().is_some());
            assert!(p.options().contains_key("color"));
            visited += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(visited, 1);
    assert!(plugin::ambient_context().is_none());
}

#[test]
fn test_ambient_context_restored_when_visitor_fails() {
    let repo = plugin_repo();
    let layout =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap();

    let outcome = layout.visit_install_plugins(&mut |_| Err(Error::other("boom")));
    assert!(outcome.is_err());
    assert!(plugin::ambient_context().is_none());
}

#[test]
fn test_plugin_option_accepted_from_config() {
    let repo = plugin_repo();
    let mut builder = config(&[direct("a:main#1.0")]).to_builder();
    builder.add_option("color", "red");

    let layout = ProvisioningLayout::new(repo.factory(), builder.build()).unwrap();
    assert_eq!(layout.option_value("color"), Some("red"));
}

#[test]
fn test_transient_override_differs_removes_config_entry() {
    let repo = plugin_repo();
    let mut builder = config(&[direct("a:main#1.0")]).to_builder();
    builder.add_option("color", "red");

    let mut layout = ProvisioningLayout::new(repo.factory(), builder.build()).unwrap();
    let mut extra = BTreeMap::new();
    extra.insert("color".to_string(), "blue".to_string());
    layout
        .install_with_options(direct("b:main#1.0"), extra)
        .unwrap();

    // the override applies to this run only
    assert_eq!(layout.option_value("color"), Some("blue"));
    assert_eq!(layout.config().option("color"), None);
}

#[test]
fn test_transient_override_equal_keeps_config_entry() {
    let repo = plugin_repo();
    let mut builder = config(&[direct("a:main#1.0")]).to_builder();
    builder.add_option("color", "red");

    let mut layout = ProvisioningLayout::new(repo.factory(), builder.build()).unwrap();
    let mut extra = BTreeMap::new();
    extra.insert("color".to_string(), "red".to_string());
    layout
        .install_with_options(direct("b:main#1.0"), extra)
        .unwrap();

    assert_eq!(layout.option_value("color"), Some("red"));
    assert_eq!(layout.config().option("color"), Some("red"));
}

struct DemandingPlugin;

impl InstallPlugin for DemandingPlugin {
    fn options(&self) -> BTreeMap<String, ProvisioningOption> {
        let mut options = BTreeMap::new();
        options.insert(
            "target-dir".to_string(),
            ProvisioningOption::new("target-dir").required(),
        );
        options
    }
}

#[test]
fn test_required_plugin_option() {
    let repo = TestRepo::new();
    repo.set_plugin_registry(Rc::new(StaticPluginRegistry::new(vec![Rc::new(
        DemandingPlugin,
    )])));
    repo.add(fp("a", "main", "1.0").file("plugins/dummy.jar", "x"));

    let err =
        ProvisioningLayout::new(repo.factory(), config(&[direct("a:main#1.0")])).unwrap_err();
    assert!(matches!(err, Error::PluginOptionRequired(name) if name == "target-dir"));

    let mut builder = config(&[direct("a:main#1.0")]).to_builder();
    builder.add_option("target-dir", "/srv/out");
    let layout = ProvisioningLayout::new(repo.factory(), builder.build()).unwrap();
    assert_eq!(layout.option_value("target-dir"), Some("/srv/out"));
}
