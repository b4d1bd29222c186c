// src/spec.rs

//! Feature-pack metadata
//!
//! A `FeaturePackSpec` is the parsed metadata of a resolved feature pack:
//! its concrete id, the dependencies it declares, the plugin artifacts it
//! contributes, its default packages and, for a patch, the id of the feature
//! pack it patches. How the metadata is read out of an archive is the
//! archive reader's business; the engine only consumes the parsed form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{FeaturePackConfig, FeaturePackDeps};
use crate::error::{Error, Result};
use crate::location::{FpId, ProducerSpec};
use crate::plugin::FeaturePackPlugin;

/// Parsed metadata of a feature pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePackSpec {
    fpid: FpId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    transitive_deps: Vec<FeaturePackConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fp_deps: Vec<FeaturePackConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    default_packages: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    plugins: BTreeMap<String, FeaturePackPlugin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    patch_for: Option<FpId>,
}

impl FeaturePackSpec {
    pub fn builder(fpid: FpId) -> FeaturePackSpecBuilder {
        FeaturePackSpecBuilder {
            fpid,
            transitive_deps: Vec::new(),
            fp_deps: Vec::new(),
            default_packages: Vec::new(),
            plugins: BTreeMap::new(),
            patch_for: None,
        }
    }

    pub fn fpid(&self) -> &FpId {
        &self.fpid
    }

    pub fn default_packages(&self) -> &[String] {
        &self.default_packages
    }

    pub fn plugins(&self) -> &BTreeMap<String, FeaturePackPlugin> {
        &self.plugins
    }

    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Whether this feature pack is a patch for another one
    pub fn is_patch(&self) -> bool {
        self.patch_for.is_some()
    }

    pub fn patch_for(&self) -> Option<&FpId> {
        self.patch_for.as_ref()
    }

    pub fn has_direct_dep(&self, producer: &ProducerSpec) -> bool {
        self.fp_deps.iter().any(|d| &d.producer() == producer)
    }

    pub fn has_transitive_dep(&self, producer: &ProducerSpec) -> bool {
        self.transitive_deps.iter().any(|d| &d.producer() == producer)
    }
}

impl FeaturePackDeps for FeaturePackSpec {
    fn direct_deps(&self) -> &[FeaturePackConfig] {
        &self.fp_deps
    }

    fn transitive_deps(&self) -> &[FeaturePackConfig] {
        &self.transitive_deps
    }
}

/// Builder for [`FeaturePackSpec`]
///
/// Dependency order is significant: the traversal processes declared
/// dependencies in declaration order, so the builder preserves insertion
/// order exactly. Rebuilding a spec (when coordinate-form dependencies get
/// translated to resolved locations) relies on this.
#[derive(Debug, Clone)]
pub struct FeaturePackSpecBuilder {
    fpid: FpId,
    transitive_deps: Vec<FeaturePackConfig>,
    fp_deps: Vec<FeaturePackConfig>,
    default_packages: Vec<String>,
    plugins: BTreeMap<String, FeaturePackPlugin>,
    patch_for: Option<FpId>,
}

impl FeaturePackSpecBuilder {
    /// Add a declared dependency, routed by its transitive flag
    pub fn add_feature_pack_dep(mut self, dep: FeaturePackConfig) -> Result<Self> {
        let producer = dep.producer();
        let deps = if dep.is_transitive() {
            &mut self.transitive_deps
        } else {
            &mut self.fp_deps
        };
        if deps.iter().any(|d| d.producer() == producer) {
            return Err(Error::other(format!(
                "feature pack {} declares {} more than once",
                self.fpid, producer
            )));
        }
        deps.push(dep);
        Ok(self)
    }

    pub fn add_default_package(mut self, name: impl Into<String>) -> Self {
        self.default_packages.push(name.into());
        self
    }

    pub fn add_plugin(mut self, plugin: FeaturePackPlugin) -> Self {
        self.plugins.insert(plugin.id().to_string(), plugin);
        self
    }

    pub fn set_patch_for(mut self, target: FpId) -> Self {
        self.patch_for = Some(target);
        self
    }

    pub fn build(self) -> FeaturePackSpec {
        FeaturePackSpec {
            fpid: self.fpid,
            transitive_deps: self.transitive_deps,
            fp_deps: self.fp_deps,
            default_packages: self.default_packages,
            plugins: self.plugins,
            patch_for: self.patch_for,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::FeaturePackLocation;

    fn fpid(s: &str) -> FpId {
        s.parse().unwrap()
    }

    fn dep(s: &str) -> FeaturePackConfig {
        FeaturePackConfig::for_location(s.parse::<FeaturePackLocation>().unwrap())
    }

    #[test]
    fn test_dep_order_preserved() {
        let spec = FeaturePackSpec::builder(fpid("a:main#1"))
            .add_feature_pack_dep(dep("b:main#1"))
            .unwrap()
            .add_feature_pack_dep(dep("c:main#1"))
            .unwrap()
            .build();
        let order: Vec<String> = spec
            .direct_deps()
            .iter()
            .map(|d| d.producer().to_string())
            .collect();
        assert_eq!(order, ["b", "c"]);
    }

    #[test]
    fn test_duplicate_dep_rejected() {
        let result = FeaturePackSpec::builder(fpid("a:main#1"))
            .add_feature_pack_dep(dep("b:main#1"))
            .unwrap()
            .add_feature_pack_dep(dep("b:main#2"));
        assert!(result.is_err());
    }

    #[test]
    fn test_patch_spec() {
        let spec = FeaturePackSpec::builder(fpid("a-patch:main#1"))
            .set_patch_for(fpid("a:main#1"))
            .build();
        assert!(spec.is_patch());
        assert_eq!(spec.patch_for(), Some(&fpid("a:main#1")));
    }

    #[test]
    fn test_spec_round_trips_through_json() {
        let spec = FeaturePackSpec::builder(fpid("a:main#1"))
            .add_feature_pack_dep(dep("b:main#1"))
            .unwrap()
            .add_plugin(FeaturePackPlugin::new("wf", "maven", "org.wf:plugin:1"))
            .add_default_package("docs")
            .build();
        let json = serde_json::to_string(&spec).unwrap();
        let back: FeaturePackSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
