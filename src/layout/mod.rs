// src/layout/mod.rs

//! Provisioning layout: the resolved, on-disk view of a configuration
//!
//! A `ProvisioningLayout` is built from a [`ProvisioningConfig`]: every
//! referenced feature pack is resolved to a concrete build, laid out in
//! dependency order, patched, and its resources and plugin artifacts are
//! aggregated into a shared work area. The layout exposes incremental
//! mutation (install / uninstall / apply-plan / update queries) that edits
//! the configuration and rebuilds.
//!
//! The layout is a workspace object owned by one caller at a time; it is
//! not safe for concurrent mutation. It can be *transformed* into a layout
//! carrying a different feature-pack type; transformed views share the
//! work area through a reference count and the directory is deleted when
//! the last view closes.

pub mod plan;

mod build;
mod handle;
mod mutation;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::config::{FeaturePackDeps, ProvisioningConfig};
use crate::error::{Error, Result};
use crate::location::{FeaturePackLocation, FpId, ProducerSpec};
use crate::options::{self, ProvisioningOption};
use crate::plugin::{FeaturePackPlugin, InstallPlugin, NoPluginRegistry, PluginRegistry};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::spec::FeaturePackSpec;
use crate::universe::UniverseResolver;

use self::handle::Handle;
use self::plan::{FeaturePackUpdatePlan, ProvisioningPlan};

/// Well-known subdirectories of a feature-pack archive
pub const RESOURCES: &str = "resources";
pub const PLUGINS: &str = "plugins";
pub const PACKAGES: &str = "packages";
pub const FEATURES: &str = "features";
pub const FEATURE_GROUPS: &str = "feature-groups";
pub const CONFIGS: &str = "configs";
pub const LAYERS: &str = "layers";

/// How a feature pack entered the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpType {
    /// Listed at the top level of the configuration
    DirectDep,
    /// Pulled in through another feature pack's spec
    TransitiveDep,
    /// A patch overlaying another feature pack
    Patch,
}

/// A resolved feature pack as the layout sees it
///
/// Embedders parameterize the layout with their own type to attach
/// per-feature-pack state; the engine only relies on these accessors.
pub trait FeaturePackLayout {
    fn location(&self) -> &FeaturePackLocation;

    fn spec(&self) -> &FeaturePackSpec;

    /// The directory the feature pack currently occupies. Patching points
    /// this at the patched copy.
    fn dir(&self) -> &Path;

    fn set_dir(&mut self, dir: PathBuf);

    fn fp_type(&self) -> FpType;

    fn fpid(&self) -> FpId {
        self.location().fpid()
    }

    fn is_direct_dep(&self) -> bool {
        self.fp_type() == FpType::DirectDep
    }

    fn is_transitive_dep(&self) -> bool {
        self.fp_type() == FpType::TransitiveDep
    }

    fn is_patch(&self) -> bool {
        self.fp_type() == FpType::Patch
    }
}

/// The plain feature-pack layout used when no extra state is needed
#[derive(Debug, Clone)]
pub struct FeaturePack {
    location: FeaturePackLocation,
    spec: FeaturePackSpec,
    dir: PathBuf,
    fp_type: FpType,
}

impl FeaturePackLayout for FeaturePack {
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

/// Constructs the user-chosen feature-pack type from resolved parts
pub trait FeaturePackLayoutFactory {
    type Layout: FeaturePackLayout;

    fn new_feature_pack(
        &self,
        location: FeaturePackLocation,
        spec: FeaturePackSpec,
        dir: PathBuf,
        fp_type: FpType,
    ) -> Result<Self::Layout>;
}

/// Factory for the plain [`FeaturePack`]
pub struct DefaultFpFactory;

impl FeaturePackLayoutFactory for DefaultFpFactory {
    type Layout = FeaturePack;

    fn new_feature_pack(
        &self,
        location: FeaturePackLocation,
        spec: FeaturePackSpec,
        dir: PathBuf,
        fp_type: FpType,
    ) -> Result<FeaturePack> {
        Ok(FeaturePack {
            location,
            spec,
            dir,
            fp_type,
        })
    }
}

/// A feature-pack archive resolved to its metadata and unpacked directory
#[derive(Debug, Clone)]
pub struct ResolvedFeaturePack {
    /// The full location the archive resolved to. For a coordinate-form
    /// request this is the normalized location.
    pub location: FeaturePackLocation,
    pub spec: FeaturePackSpec,
    pub dir: PathBuf,
}

/// The boundary to archive resolution, plugin discovery and progress
/// reporting. Implementations own the universe resolver and know how to
/// turn a location into an unpacked feature-pack directory.
pub trait LayoutFactory {
    fn universe_resolver(&self) -> &dyn UniverseResolver;

    /// Resolve a feature-pack archive to its metadata and directory
    fn resolve_feature_pack(&self, fpl: &FeaturePackLocation) -> Result<ResolvedFeaturePack>;

    fn plugin_registry(&self) -> Rc<dyn PluginRegistry> {
        Rc::new(NoPluginRegistry)
    }

    fn build_tracker(&self) -> Box<dyn ProgressTracker> {
        Box::new(SilentProgress::new())
    }

    fn updates_tracker(&self) -> Box<dyn ProgressTracker> {
        Box::new(SilentProgress::new())
    }
}

/// The resolved layout of a provisioning configuration
pub struct ProvisioningLayout<F: FeaturePackLayout> {
    factory: Rc<dyn LayoutFactory>,
    fp_factory: Rc<dyn FeaturePackLayoutFactory<Layout = F>>,
    handle: Rc<Handle>,
    config: ProvisioningConfig,
    options: BTreeMap<String, String>,

    // arena of resolved feature packs; every other collection holds indices
    arena: Vec<F>,
    feature_packs: HashMap<ProducerSpec, usize>,
    coordinate_producers: HashMap<ProducerSpec, usize>,
    ordered: Vec<usize>,
    all_patches: HashMap<FpId, usize>,
    fp_patches: HashMap<FpId, Vec<usize>>,
    plugin_locations: BTreeMap<String, FeaturePackPlugin>,

    // build-scoped scratch
    transitive_deps: Vec<ProducerSpec>,
    resolved_versions: Vec<(ProducerSpec, FeaturePackLocation)>,
    conflicts: Vec<(ProducerSpec, Vec<FpId>)>,
    fail_on_convergence: bool,
    build_tracker: Option<Box<dyn ProgressTracker>>,

    closed: bool,
}

impl<F: FeaturePackLayout> fmt::Debug for ProvisioningLayout<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningLayout")
            .field("config", &self.config)
            .field("ordered", &self.ordered)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ProvisioningLayout<FeaturePack> {
    /// Build the layout of a configuration with the plain feature-pack type
    pub fn new(factory: Rc<dyn LayoutFactory>, config: ProvisioningConfig) -> Result<Self> {
        Self::with_factory(factory, config, Rc::new(DefaultFpFactory), BTreeMap::new())
    }

    /// Same as [`ProvisioningLayout::new`] with per-run option overrides
    pub fn with_options(
        factory: Rc<dyn LayoutFactory>,
        config: ProvisioningConfig,
        extra_options: BTreeMap<String, String>,
    ) -> Result<Self> {
        Self::with_factory(factory, config, Rc::new(DefaultFpFactory), extra_options)
    }
}

impl<F: FeaturePackLayout> ProvisioningLayout<F> {
    /// Build the layout of a configuration with a custom feature-pack type
    pub fn with_factory(
        factory: Rc<dyn LayoutFactory>,
        config: ProvisioningConfig,
        fp_factory: Rc<dyn FeaturePackLayoutFactory<Layout = F>>,
        extra_options: BTreeMap<String, String>,
    ) -> Result<Self> {
        let handle = Handle::new(factory.plugin_registry());
        let mut layout = Self {
            factory,
            fp_factory,
            handle,
            config,
            options: BTreeMap::new(),
            arena: Vec::new(),
            feature_packs: HashMap::new(),
            coordinate_producers: HashMap::new(),
            ordered: Vec::new(),
            all_patches: HashMap::new(),
            fp_patches: HashMap::new(),
            plugin_locations: BTreeMap::new(),
            transitive_deps: Vec::new(),
            resolved_versions: Vec::new(),
            conflicts: Vec::new(),
            fail_on_convergence: false,
            build_tracker: None,
            closed: false,
        };
        if layout.config.has_feature_pack_deps() {
            let config = layout.config.clone();
            layout.init_built_in_options(&config, &extra_options)?;
            let outcome = match layout.build_checked(false, true) {
                Ok(()) => layout.init_plugin_options(&extra_options, false),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                layout.handle.close();
                layout.closed = true;
                return Err(e);
            }
        }
        Ok(layout)
    }

    /// Re-express every feature pack through another factory, sharing the
    /// work area with this layout. The new view holds its own reference;
    /// the work area survives until the last view closes.
    pub fn transform<G: FeaturePackLayout>(
        &self,
        fp_factory: Rc<dyn FeaturePackLayoutFactory<Layout = G>>,
    ) -> Result<ProvisioningLayout<G>> {
        let transformed = {
            let fp_factory = fp_factory.clone();
            move |f: &F| {
                fp_factory.new_feature_pack(
                    f.location().clone(),
                    f.spec().clone(),
                    f.dir().to_path_buf(),
                    f.fp_type(),
                )
            }
        };
        self.transform_with(fp_factory, transformed)
    }

    /// Like [`ProvisioningLayout::transform`] with an explicit
    /// transformation of the already-resolved feature packs
    pub fn transform_with<G: FeaturePackLayout>(
        &self,
        fp_factory: Rc<dyn FeaturePackLayoutFactory<Layout = G>>,
        transformer: impl Fn(&F) -> Result<G>,
    ) -> Result<ProvisioningLayout<G>> {
        let mut arena = Vec::with_capacity(self.arena.len());
        for f in &self.arena {
            arena.push(transformer(f)?);
        }
        self.handle.increment_refs();
        Ok(ProvisioningLayout {
            factory: self.factory.clone(),
            fp_factory,
            handle: self.handle.clone(),
            config: self.config.clone(),
            options: self.options.clone(),
            arena,
            feature_packs: self.feature_packs.clone(),
            coordinate_producers: self.coordinate_producers.clone(),
            ordered: self.ordered.clone(),
            all_patches: self.all_patches.clone(),
            fp_patches: self.fp_patches.clone(),
            plugin_locations: self.plugin_locations.clone(),
            transitive_deps: Vec::new(),
            resolved_versions: Vec::new(),
            conflicts: Vec::new(),
            fail_on_convergence: self.fail_on_convergence,
            build_tracker: None,
            closed: false,
        })
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    pub fn has_feature_packs(&self) -> bool {
        !self.feature_packs.is_empty()
    }

    pub fn has_feature_pack(&self, producer: &ProducerSpec) -> bool {
        self.feature_packs.contains_key(producer)
    }

    pub fn feature_pack(&self, producer: &ProducerSpec) -> Result<&F> {
        self.feature_packs
            .get(producer)
            .or_else(|| self.coordinate_producers.get(producer))
            .map(|&idx| &self.arena[idx])
            .ok_or_else(|| Error::UnknownFeaturePack(producer.location().fpid()))
    }

    /// Feature packs in dependency order: every declared non-patch
    /// prerequisite of a feature pack precedes it
    pub fn ordered_feature_packs(&self) -> impl Iterator<Item = &F> {
        self.ordered.iter().map(|&idx| &self.arena[idx])
    }

    /// Patches applied to the feature pack, in application order
    pub fn patches(&self, fpid: &FpId) -> Vec<&F> {
        self.fp_patches
            .get(fpid)
            .map(|idxs| idxs.iter().map(|&i| &self.arena[i]).collect())
            .unwrap_or_default()
    }

    pub fn has_patches(&self) -> bool {
        !self.all_patches.is_empty()
    }

    pub fn has_plugins(&self) -> bool {
        self.handle.plugins_dir().is_some()
    }

    pub fn plugins_dir(&self) -> Option<PathBuf> {
        self.handle.plugins_dir()
    }

    pub fn has_resources(&self) -> bool {
        self.handle.resources_dir().is_some()
    }

    /// A path under the aggregated resource tree
    pub fn resource(&self, path: &[&str]) -> Result<PathBuf> {
        self.handle.resource(path)
    }

    /// A path under the caller-visible scratch directory
    pub fn tmp_path(&self, path: &[&str]) -> Result<PathBuf> {
        self.handle.tmp_path(path)
    }

    /// The staged output directory, emptied if it already exists
    pub fn new_staged_dir(&self) -> Result<PathBuf> {
        self.handle.new_staged_dir()
    }

    /// The discovery context opened over the aggregated plugins directory,
    /// shared across visits until the next rebuild
    pub fn plugin_discovery(&self) -> Result<Rc<dyn crate::plugin::DiscoveryContext>> {
        self.handle.discovery_context()
    }

    /// Visit every discovered install plugin; the discovery context is
    /// ambient for the duration of the visit
    pub fn visit_install_plugins(
        &self,
        visitor: &mut dyn FnMut(&dyn InstallPlugin) -> Result<()>,
    ) -> Result<()> {
        self.handle.visit_install_plugins(visitor)
    }

    pub fn is_option_set(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn option_value_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.option_value(name).unwrap_or(default)
    }

    /// The value of a declared option, validated against its declaration:
    /// required options must be set unless they carry a default, set values
    /// must be in the declared value set
    pub fn checked_option_value(&self, option: &ProvisioningOption) -> Result<Option<String>> {
        match self.options.get(option.name()) {
            None => {
                if option.is_required() && option.default().is_none() {
                    return Err(Error::PluginOptionRequired(option.name().to_string()));
                }
                Ok(option.default().map(str::to_string))
            }
            Some(value) => {
                if !option.allowed_values().is_empty()
                    && !option.allowed_values().iter().any(|v| v == value)
                {
                    return Err(Error::PluginOptionIllegalValue {
                        name: option.name().to_string(),
                        value: value.clone(),
                        allowed: option.allowed_values().to_vec(),
                    });
                }
                Ok(Some(value.clone()))
            }
        }
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Query available updates and patches for the installed feature packs
    ///
    /// With `include_transitive` every installed producer is queried,
    /// otherwise only the producers installed directly by the user.
    pub fn updates(&self, include_transitive: bool) -> Result<ProvisioningPlan> {
        let producers: Vec<ProducerSpec> = if include_transitive {
            self.ordered_feature_packs()
                .map(|f| f.fpid().producer())
                .collect()
        } else {
            self.config.producers()
        };
        self.updates_for(&producers)
    }

    /// Query available updates for specific producers; an empty slice means
    /// the direct entries of the configuration
    pub fn updates_for(&self, producers: &[ProducerSpec]) -> Result<ProvisioningPlan> {
        if producers.is_empty() {
            return self.updates(false);
        }
        let tracker = self.factory.updates_tracker();
        tracker.set_length(producers.len() as u64);
        let mut plan = ProvisioningPlan::new();
        for producer in producers {
            tracker.set_message(&producer.to_string());
            let fp_plan = self.feature_pack_update(producer)?;
            if !fp_plan.is_empty() {
                plan.update(fp_plan);
            }
            tracker.increment(1);
        }
        tracker.finish_with_message("update check complete");
        Ok(plan)
    }

    /// The update plan for a single installed producer
    pub fn feature_pack_update(&self, producer: &ProducerSpec) -> Result<FeaturePackUpdatePlan> {
        let f = self.feature_pack(producer)?;
        let fpl = f.fpid().to_location(f.location().frequency().map(str::to_string));
        let channel = self.factory.universe_resolver().channel(&fpl)?;
        let patch_ids: Vec<FpId> = self
            .patches(&f.fpid())
            .iter()
            .map(|p| p.fpid())
            .collect();
        let request = FeaturePackUpdatePlan::request(fpl, patch_ids, f.is_transitive_dep());
        channel.update_plan(request)
    }

    /// Whether this view is closed, either explicitly or because a failed
    /// build released the work area
    pub fn is_closed(&self) -> bool {
        self.closed || self.handle.is_closed()
    }

    /// Close this view of the layout. The work area is deleted when the
    /// last view closes; closing twice is a no-op and close never fails.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handle.close();
        debug!("provisioning layout closed");
    }

    pub(crate) fn init_built_in_options(
        &mut self,
        config: &ProvisioningConfig,
        extra_options: &BTreeMap<String, String>,
    ) -> Result<()> {
        let set_value = extra_options
            .get(options::VERSION_CONVERGENCE)
            .or_else(|| self.options.get(options::VERSION_CONVERGENCE))
            .cloned()
            .or_else(|| config.option(options::VERSION_CONVERGENCE).map(str::to_string));
        self.fail_on_convergence = match set_value.as_deref() {
            None => false,
            Some(options::FIRST_PROCESSED) => false,
            Some(options::FAIL) => true,
            Some(other) => {
                return Err(Error::PluginOptionIllegalValue {
                    name: options::VERSION_CONVERGENCE.to_string(),
                    value: other.to_string(),
                    allowed: vec![
                        options::FIRST_PROCESSED.to_string(),
                        options::FAIL.to_string(),
                    ],
                })
            }
        };
        Ok(())
    }

    /// Reconcile configured options, per-run overrides and the declarations
    /// of the built-in set plus every discovered install plugin
    pub(crate) fn init_plugin_options(
        &mut self,
        extra_options: &BTreeMap<String, String>,
        cleanup_config_options: bool,
    ) -> Result<()> {
        let mut defs = options::builtin_options();
        self.handle.visit_install_plugins(&mut |plugin| {
            defs.extend(plugin.options().into_values());
            Ok(())
        })?;
        let outcome = options::reconcile(
            self.config.options(),
            extra_options,
            &defs,
            cleanup_config_options,
        )?;
        if outcome.rebuild_config || !outcome.config_edits.is_empty() {
            let mut builder = self.config.to_builder();
            for edit in &outcome.config_edits {
                match edit {
                    options::ConfigOptionEdit::Set(name, value) => {
                        builder.add_option(name.clone(), value.clone());
                    }
                    options::ConfigOptionEdit::Remove(name) => {
                        builder.remove_option(name);
                    }
                }
            }
            self.config = builder.build();
        }
        self.options = outcome.effective;
        Ok(())
    }

    pub(crate) fn universe_resolver(&self) -> &dyn UniverseResolver {
        self.factory.universe_resolver()
    }
}

impl<F: FeaturePackLayout> Drop for ProvisioningLayout<F> {
    fn drop(&mut self) {
        self.close();
    }
}
