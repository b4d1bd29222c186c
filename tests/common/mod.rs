// tests/common/mod.rs

//! Shared test harness: an in-memory universe backed by a temp directory.
//!
//! `TestRepo` plays every external role at once: it is the layout factory,
//! the universe resolver, the single universe, and the artifact resolver.
//! Feature packs are registered through `FpBuilder`, which materializes a
//! directory per pack (with its `spec.json` and content files) the way an
//! archive reader would have unpacked it.

// not every test binary uses every helper
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use stevedore::{
    ArtifactResolver, Channel, Error, FeaturePackConfig, FeaturePackLocation, FeaturePackPlugin,
    FeaturePackSpec, FpId, LayoutFactory, PluginRegistry, ProducerSpec, ProvisioningConfig,
    ResolvedFeaturePack, Result, Universe, UniverseResolver,
};
use tempfile::TempDir;

pub fn fpl(s: &str) -> FeaturePackLocation {
    s.parse().unwrap()
}

pub fn fpid(s: &str) -> FpId {
    s.parse().unwrap()
}

pub fn producer(s: &str) -> ProducerSpec {
    fpl(s).producer()
}

pub fn direct(s: &str) -> FeaturePackConfig {
    FeaturePackConfig::for_location(fpl(s))
}

pub fn transitive(s: &str) -> FeaturePackConfig {
    FeaturePackConfig::transitive_builder(fpl(s)).build()
}

/// A provisioning configuration from a list of entries
pub fn config(entries: &[FeaturePackConfig]) -> ProvisioningConfig {
    let mut builder = ProvisioningConfig::builder();
    for entry in entries {
        builder.add_feature_pack_dep(entry.clone()).unwrap();
    }
    builder.build()
}

struct RepoInner {
    root: TempDir,
    // "producer:channel#build" -> unpacked feature-pack directory
    packs: RefCell<HashMap<String, PathBuf>>,
    latest: RefCell<HashMap<(String, String), String>>,
    default_channel: RefCell<HashMap<String, String>>,
    // coordinate string -> the pack it resolves to
    coordinates: RefCell<HashMap<String, String>>,
    artifacts: RefCell<HashMap<String, PathBuf>>,
    registry: RefCell<Option<Rc<dyn PluginRegistry>>>,
}

/// In-memory universe, channel catalog and artifact repository
#[derive(Clone)]
pub struct TestRepo(Rc<RepoInner>);

impl TestRepo {
    pub fn new() -> Self {
        Self(Rc::new(RepoInner {
            root: tempfile::tempdir().unwrap(),
            packs: RefCell::new(HashMap::new()),
            latest: RefCell::new(HashMap::new()),
            default_channel: RefCell::new(HashMap::new()),
            coordinates: RefCell::new(HashMap::new()),
            artifacts: RefCell::new(HashMap::new()),
            registry: RefCell::new(None),
        }))
    }

    /// Register a feature pack; the registered build becomes the channel's
    /// latest, so register builds oldest first
    pub fn add(&self, fp: FpBuilder) -> FpId {
        let id = fpid(&format!("{}:{}#{}", fp.producer, fp.channel, fp.build));
        let key = pack_key(&fp.producer, &fp.channel, &fp.build);
        let dir = self
            .0
            .root
            .path()
            .join("packs")
            .join(&fp.producer)
            .join(&fp.channel)
            .join(&fp.build);
        fs::create_dir_all(&dir).unwrap();

        let mut spec = FeaturePackSpec::builder(id.clone());
        for dep in &fp.deps {
            spec = spec.add_feature_pack_dep(dep.clone()).unwrap();
        }
        for plugin in &fp.plugins {
            spec = spec.add_plugin(plugin.clone());
        }
        if let Some(target) = &fp.patch_for {
            spec = spec.set_patch_for(target.clone());
        }
        let spec = spec.build();
        fs::write(dir.join("spec.json"), serde_json::to_string_pretty(&spec).unwrap()).unwrap();

        for (rel, content) in &fp.files {
            let path = dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        self.0.packs.borrow_mut().insert(key.clone(), dir);
        self.0
            .latest
            .borrow_mut()
            .insert((fp.producer.clone(), fp.channel.clone()), fp.build.clone());
        self.0
            .default_channel
            .borrow_mut()
            .entry(fp.producer.clone())
            .or_insert_with(|| fp.channel.clone());
        if let Some(coords) = &fp.coordinates {
            self.0.coordinates.borrow_mut().insert(coords.clone(), key);
        }
        id
    }

    /// Pin which build a channel reports as latest
    pub fn set_latest(&self, producer: &str, channel: &str, build: &str) {
        self.0
            .latest
            .borrow_mut()
            .insert((producer.to_string(), channel.to_string()), build.to_string());
    }

    /// Register a plugin artifact under the "test-repo" artifact resolver
    pub fn add_artifact(&self, location: &str, content: &str) {
        let dir = self.0.root.path().join("artifacts");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(location.replace([':', '/'], "_"));
        fs::write(&path, content).unwrap();
        self.0
            .artifacts
            .borrow_mut()
            .insert(location.to_string(), path);
    }

    pub fn set_plugin_registry(&self, registry: Rc<dyn PluginRegistry>) {
        *self.0.registry.borrow_mut() = Some(registry);
    }

    pub fn factory(&self) -> Rc<dyn LayoutFactory> {
        Rc::new(self.clone())
    }

    fn pack_dir(&self, producer: &str, channel: &str, build: &str) -> Result<PathBuf> {
        self.0
            .packs
            .borrow()
            .get(&pack_key(producer, channel, build))
            .cloned()
            .ok_or_else(|| {
                Error::UnknownFeaturePack(fpid(&format!("{}:{}#{}", producer, channel, build)))
            })
    }

    fn read_spec(&self, dir: &Path) -> Result<FeaturePackSpec> {
        let raw = fs::read_to_string(dir.join("spec.json"))?;
        serde_json::from_str(&raw).map_err(|e| Error::Other(e.to_string()))
    }
}

fn pack_key(producer: &str, channel: &str, build: &str) -> String {
    format!("{}:{}#{}", producer, channel, build)
}

impl LayoutFactory for TestRepo {
    fn universe_resolver(&self) -> &dyn UniverseResolver {
        self
    }

    fn resolve_feature_pack(&self, fpl: &FeaturePackLocation) -> Result<ResolvedFeaturePack> {
        let dir = if fpl.is_coordinates() {
            let key = self
                .0
                .coordinates
                .borrow()
                .get(fpl.producer_name())
                .cloned()
                .ok_or_else(|| Error::other(format!("unknown coordinates {}", fpl)))?;
            self.0.packs.borrow().get(&key).cloned().unwrap()
        } else {
            let channel = fpl
                .channel_name()
                .ok_or_else(|| Error::other(format!("no channel in {}", fpl)))?;
            let build = fpl
                .build()
                .ok_or_else(|| Error::other(format!("no build in {}", fpl)))?;
            self.pack_dir(fpl.producer_name(), channel, build)?
        };
        let spec = self.read_spec(&dir)?;
        let location = spec
            .fpid()
            .to_location(fpl.frequency().map(str::to_string));
        Ok(ResolvedFeaturePack {
            location,
            spec,
            dir,
        })
    }

    fn plugin_registry(&self) -> Rc<dyn PluginRegistry> {
        match &*self.0.registry.borrow() {
            Some(registry) => registry.clone(),
            None => Rc::new(stevedore::NoPluginRegistry),
        }
    }
}

impl UniverseResolver for TestRepo {
    fn universe(&self, _spec: Option<&stevedore::UniverseSpec>) -> Result<Rc<dyn Universe>> {
        Ok(Rc::new(self.clone()))
    }

    fn artifact_resolver(&self, repo_id: &str) -> Option<Rc<dyn ArtifactResolver>> {
        (repo_id == "test-repo").then(|| Rc::new(self.clone()) as Rc<dyn ArtifactResolver>)
    }
}

impl Universe for TestRepo {
    fn channel(&self, producer: &str, channel: Option<&str>) -> Result<Rc<dyn Channel>> {
        let name = match channel {
            Some(name) => name.to_string(),
            None => self
                .0
                .default_channel
                .borrow()
                .get(producer)
                .cloned()
                .ok_or_else(|| Error::other(format!("unknown producer {}", producer)))?,
        };
        if !self
            .0
            .latest
            .borrow()
            .contains_key(&(producer.to_string(), name.clone()))
        {
            return Err(Error::other(format!(
                "unknown channel {} of {}",
                name, producer
            )));
        }
        Ok(Rc::new(TestChannel {
            repo: self.clone(),
            producer: producer.to_string(),
            name,
        }))
    }
}

impl ArtifactResolver for TestRepo {
    fn resolve(&self, location: &str) -> Result<PathBuf> {
        self.0
            .artifacts
            .borrow()
            .get(location)
            .cloned()
            .ok_or_else(|| Error::other(format!("unknown artifact {}", location)))
    }
}

struct TestChannel {
    repo: TestRepo,
    producer: String,
    name: String,
}

impl Channel for TestChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn latest_build(&self, _fpl: &FeaturePackLocation) -> Result<String> {
        self.repo
            .0
            .latest
            .borrow()
            .get(&(self.producer.clone(), self.name.clone()))
            .cloned()
            .ok_or_else(|| Error::other(format!("no builds on {}:{}", self.producer, self.name)))
    }

    fn resolve(&self, fpl: &FeaturePackLocation) -> Result<PathBuf> {
        let build = fpl
            .build()
            .ok_or_else(|| Error::other(format!("no build in {}", fpl)))?;
        self.repo.pack_dir(&self.producer, &self.name, build)
    }

    fn is_resolved(&self, fpl: &FeaturePackLocation) -> Result<bool> {
        Ok(fpl
            .build()
            .is_some_and(|b| self.repo.pack_dir(&self.producer, &self.name, b).is_ok()))
    }
}

/// Declarative feature-pack fixture
pub struct FpBuilder {
    producer: String,
    channel: String,
    build: String,
    deps: Vec<FeaturePackConfig>,
    patch_for: Option<FpId>,
    files: Vec<(String, String)>,
    plugins: Vec<FeaturePackPlugin>,
    coordinates: Option<String>,
}

/// Start a feature-pack fixture for `producer:channel#build`
pub fn fp(producer: &str, channel: &str, build: &str) -> FpBuilder {
    FpBuilder {
        producer: producer.to_string(),
        channel: channel.to_string(),
        build: build.to_string(),
        deps: Vec::new(),
        patch_for: None,
        files: Vec::new(),
        plugins: Vec::new(),
        coordinates: None,
    }
}

impl FpBuilder {
    /// Declare a direct dependency
    pub fn dep(mut self, fpl_str: &str) -> Self {
        self.deps.push(direct(fpl_str));
        self
    }

    /// Declare a transitive dependency refinement
    pub fn transitive_dep(mut self, fpl_str: &str) -> Self {
        self.deps.push(transitive(fpl_str));
        self
    }

    /// Declare a dependency entry verbatim
    pub fn dep_config(mut self, dep: FeaturePackConfig) -> Self {
        self.deps.push(dep);
        self
    }

    /// Mark this pack as a patch of the given feature pack
    pub fn patch_for(mut self, target: &str) -> Self {
        self.patch_for = Some(fpid(target));
        self
    }

    /// A file under `resources/`
    pub fn resource(mut self, name: &str, content: &str) -> Self {
        self.files
            .push((format!("resources/{}", name), content.to_string()));
        self
    }

    /// A file at an arbitrary path inside the pack
    pub fn file(mut self, rel: &str, content: &str) -> Self {
        self.files.push((rel.to_string(), content.to_string()));
        self
    }

    /// Declare a plugin artifact
    pub fn plugin(mut self, id: &str, repo_id: &str, location: &str) -> Self {
        self.plugins
            .push(FeaturePackPlugin::new(id, repo_id, location));
        self
    }

    /// Also make this pack resolvable through raw artifact coordinates
    pub fn coordinates(mut self, coords: &str) -> Self {
        self.coordinates = Some(coords.to_string());
        self
    }
}
