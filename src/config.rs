// src/config.rs

//! Declarative installation configuration
//!
//! A `ProvisioningConfig` describes what the installation should contain:
//! an ordered list of direct feature-pack entries, a set of transitive
//! entries addressed by producer, global options and universe aliases.
//! Configurations are immutable; builders produce new instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::{FeaturePackLocation, FpId, ProducerSpec, UniverseSpec};

/// One feature-pack entry of the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePackConfig {
    location: FeaturePackLocation,
    #[serde(default)]
    transitive: bool,
    #[serde(default)]
    patches: Vec<FpId>,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

impl FeaturePackConfig {
    /// A direct entry for the location with no patches or options
    pub fn for_location(location: FeaturePackLocation) -> Self {
        Self::builder(location).build()
    }

    pub fn builder(location: FeaturePackLocation) -> FeaturePackConfigBuilder {
        FeaturePackConfigBuilder {
            location,
            transitive: false,
            patches: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    /// A builder for a transitive entry
    pub fn transitive_builder(location: FeaturePackLocation) -> FeaturePackConfigBuilder {
        let mut builder = Self::builder(location);
        builder.transitive = true;
        builder
    }

    /// A builder seeded with this entry's location, kind and state
    pub fn to_builder(&self) -> FeaturePackConfigBuilder {
        FeaturePackConfigBuilder {
            location: self.location.clone(),
            transitive: self.transitive,
            patches: self.patches.clone(),
            options: self.options.clone(),
        }
    }

    pub fn location(&self) -> &FeaturePackLocation {
        &self.location
    }

    pub fn producer(&self) -> ProducerSpec {
        self.location.producer()
    }

    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    pub fn patches(&self) -> &[FpId] {
        &self.patches
    }

    pub fn has_patches(&self) -> bool {
        !self.patches.is_empty()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }
}

/// Builder for [`FeaturePackConfig`]
#[derive(Debug, Clone)]
pub struct FeaturePackConfigBuilder {
    location: FeaturePackLocation,
    transitive: bool,
    patches: Vec<FpId>,
    options: BTreeMap<String, String>,
}

impl FeaturePackConfigBuilder {
    /// Copy patches and options from an existing entry
    pub fn init(mut self, other: &FeaturePackConfig) -> Self {
        self.patches = other.patches.clone();
        self.options = other.options.clone();
        self
    }

    pub fn add_patch(mut self, patch: FpId) -> Self {
        if !self.patches.contains(&patch) {
            self.patches.push(patch);
        }
        self
    }

    pub fn remove_patch(mut self, patch: &FpId) -> Self {
        self.patches.retain(|p| p != patch);
        self
    }

    pub fn set_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> FeaturePackConfig {
        FeaturePackConfig {
            location: self.location,
            transitive: self.transitive,
            patches: self.patches,
            options: self.options,
        }
    }
}

/// Anything that declares feature-pack dependencies: the installation
/// configuration at the top level, a feature-pack spec below it. The layout
/// traversal descends through both uniformly.
pub trait FeaturePackDeps {
    /// Direct entries, in declaration order
    fn direct_deps(&self) -> &[FeaturePackConfig];

    /// Transitive entries, addressed by producer
    fn transitive_deps(&self) -> &[FeaturePackConfig];

    fn has_feature_pack_deps(&self) -> bool {
        !self.direct_deps().is_empty()
    }
}

/// The configuration of the installation to be provisioned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_universe: Option<UniverseSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    universes: BTreeMap<String, UniverseSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    transitive: Vec<FeaturePackConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    direct: Vec<FeaturePackConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
}

impl ProvisioningConfig {
    pub fn builder() -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder::default()
    }

    /// A builder seeded with the full state of this configuration
    pub fn to_builder(&self) -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder {
            default_universe: self.default_universe.clone(),
            universes: self.universes.clone(),
            transitive: self.transitive.clone(),
            direct: self.direct.clone(),
            options: self.options.clone(),
        }
    }

    pub fn feature_pack_dep(&self, producer: &ProducerSpec) -> Option<&FeaturePackConfig> {
        self.direct.iter().find(|c| &c.producer() == producer)
    }

    pub fn transitive_dep(&self, producer: &ProducerSpec) -> Option<&FeaturePackConfig> {
        self.transitive.iter().find(|c| &c.producer() == producer)
    }

    pub fn has_transitive_dep(&self, producer: &ProducerSpec) -> bool {
        self.transitive_dep(producer).is_some()
    }

    /// Producers of the direct entries, in declaration order
    pub fn producers(&self) -> Vec<ProducerSpec> {
        self.direct.iter().map(|c| c.producer()).collect()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn default_universe(&self) -> Option<&UniverseSpec> {
        self.default_universe.as_ref()
    }

    pub fn universe(&self, name: &str) -> Option<&UniverseSpec> {
        self.universes.get(name)
    }
}

impl FeaturePackDeps for ProvisioningConfig {
    fn direct_deps(&self) -> &[FeaturePackConfig] {
        &self.direct
    }

    fn transitive_deps(&self) -> &[FeaturePackConfig] {
        &self.transitive
    }
}

/// Builder for [`ProvisioningConfig`]
#[derive(Debug, Clone, Default)]
pub struct ProvisioningConfigBuilder {
    default_universe: Option<UniverseSpec>,
    universes: BTreeMap<String, UniverseSpec>,
    transitive: Vec<FeaturePackConfig>,
    direct: Vec<FeaturePackConfig>,
    options: BTreeMap<String, String>,
}

impl ProvisioningConfigBuilder {
    /// Add an entry, routed by its transitive flag. Fails if the producer
    /// already has an entry of that kind.
    pub fn add_feature_pack_dep(&mut self, config: FeaturePackConfig) -> Result<&mut Self> {
        let producer = config.producer();
        let deps = if config.is_transitive() {
            &mut self.transitive
        } else {
            &mut self.direct
        };
        if deps.iter().any(|c| c.producer() == producer) {
            return Err(Error::other(format!(
                "feature pack {} has already been added",
                producer
            )));
        }
        deps.push(config);
        Ok(self)
    }

    /// Add a direct entry at the given index, clamped to the end of the list
    pub fn add_feature_pack_dep_at(
        &mut self,
        index: usize,
        config: FeaturePackConfig,
    ) -> Result<&mut Self> {
        let producer = config.producer();
        if self.direct.iter().any(|c| c.producer() == producer) {
            return Err(Error::other(format!(
                "feature pack {} has already been added",
                producer
            )));
        }
        let index = index.min(self.direct.len());
        self.direct.insert(index, config);
        Ok(self)
    }

    /// Replace the entry of the same producer, wherever it currently lives
    pub fn update_feature_pack_dep(&mut self, config: FeaturePackConfig) -> Result<&mut Self> {
        let producer = config.producer();
        let order = if config.is_transitive() {
            [true, false]
        } else {
            [false, true]
        };
        for is_transitive in order {
            let list = if is_transitive {
                &self.transitive
            } else {
                &self.direct
            };
            if let Some(pos) = list.iter().position(|c| c.producer() == producer) {
                let list_mut = if is_transitive {
                    &mut self.transitive
                } else {
                    &mut self.direct
                };
                list_mut[pos] = config;
                return Ok(self);
            }
        }
        Err(Error::other(format!(
            "{} is not a dependency of the configuration",
            producer
        )))
    }

    /// Remove the direct entry of the producer
    pub fn remove_feature_pack_dep(&mut self, producer: &ProducerSpec) -> Result<&mut Self> {
        match self.direct.iter().position(|c| &c.producer() == producer) {
            Some(pos) => {
                self.direct.remove(pos);
                Ok(self)
            }
            None => Err(Error::other(format!(
                "{} is not a dependency of the configuration",
                producer
            ))),
        }
    }

    pub fn remove_transitive_dep(&mut self, producer: &ProducerSpec) -> Result<&mut Self> {
        match self.transitive.iter().position(|c| &c.producer() == producer) {
            Some(pos) => {
                self.transitive.remove(pos);
                Ok(self)
            }
            None => Err(Error::other(format!(
                "{} is not a transitive dependency of the configuration",
                producer
            ))),
        }
    }

    /// Index of the producer's direct entry
    pub fn fp_dep_index(&self, producer: &ProducerSpec) -> Result<usize> {
        self.direct
            .iter()
            .position(|c| &c.producer() == producer)
            .ok_or_else(|| {
                Error::other(format!(
                    "{} is not a dependency of the configuration",
                    producer
                ))
            })
    }

    pub fn has_feature_pack_deps(&self) -> bool {
        !self.direct.is_empty()
    }

    pub fn transitive_dep(&self, producer: &ProducerSpec) -> Option<&FeaturePackConfig> {
        self.transitive.iter().find(|c| &c.producer() == producer)
    }

    pub fn clear_feature_pack_deps(&mut self) -> &mut Self {
        self.direct.clear();
        self.transitive.clear();
        self
    }

    pub fn add_option(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn add_options(&mut self, options: &BTreeMap<String, String>) -> &mut Self {
        self.options
            .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn remove_option(&mut self, name: &str) -> &mut Self {
        self.options.remove(name);
        self
    }

    pub fn clear_options(&mut self) -> &mut Self {
        self.options.clear();
        self
    }

    pub fn set_default_universe(&mut self, universe: UniverseSpec) -> &mut Self {
        self.default_universe = Some(universe);
        self
    }

    pub fn add_universe(&mut self, name: impl Into<String>, universe: UniverseSpec) -> &mut Self {
        self.universes.insert(name.into(), universe);
        self
    }

    /// Copy universe declarations from an existing configuration
    pub fn init_universes(&mut self, config: &ProvisioningConfig) -> &mut Self {
        self.default_universe = config.default_universe.clone();
        self.universes = config.universes.clone();
        self
    }

    pub fn build(&self) -> ProvisioningConfig {
        ProvisioningConfig {
            default_universe: self.default_universe.clone(),
            universes: self.universes.clone(),
            transitive: self
                .transitive
                .iter()
                .map(|c| self.expand_universe(c))
                .collect(),
            direct: self.direct.iter().map(|c| self.expand_universe(c)).collect(),
            options: self.options.clone(),
        }
    }

    /// Rewrite an entry location against the universe aliases: an absent
    /// universe takes the default one, a bare alias name takes the aliased
    /// spec. Coordinate-form locations stay untouched.
    fn expand_universe(&self, config: &FeaturePackConfig) -> FeaturePackConfig {
        let fpl = config.location();
        if fpl.is_coordinates() {
            return config.clone();
        }
        let universe = match fpl.universe() {
            None => match &self.default_universe {
                Some(default) => Some(default.clone()),
                None => return config.clone(),
            },
            Some(u) if u.location().is_none() => match self.universes.get(u.factory()) {
                Some(aliased) => Some(aliased.clone()),
                None => return config.clone(),
            },
            Some(_) => return config.clone(),
        };
        let mut rebuilt = config.to_builder();
        rebuilt.location = FeaturePackLocation::new(
            universe,
            fpl.producer_name(),
            fpl.channel_name().map(str::to_string),
            fpl.frequency().map(str::to_string),
            fpl.build().map(str::to_string),
        );
        rebuilt.build()
    }
}
