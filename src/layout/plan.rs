// src/layout/plan.rs

//! Update and provisioning plan data structures
//!
//! A `FeaturePackUpdatePlan` describes what would change for a single
//! producer: a new location to move to and patches to add. A
//! `ProvisioningPlan` aggregates installs, uninstalls and per-producer
//! updates into one mutation request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FeaturePackConfig;
use crate::location::{FeaturePackLocation, FpId, ProducerSpec};

/// An update request being filled in by a channel
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    installed: FeaturePackLocation,
    installed_patches: Vec<FpId>,
    transitive: bool,
    new_location: Option<FeaturePackLocation>,
    new_patches: Vec<FpId>,
}

impl UpdateRequest {
    pub fn installed_location(&self) -> &FeaturePackLocation {
        &self.installed
    }

    pub fn installed_patches(&self) -> &[FpId] {
        &self.installed_patches
    }

    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    pub fn set_new_location(&mut self, location: FeaturePackLocation) {
        self.new_location = Some(location);
    }

    /// Propose a patch, unless it is already applied or already proposed
    pub fn add_new_patch(&mut self, patch: FpId) {
        if !self.installed_patches.contains(&patch) && !self.new_patches.contains(&patch) {
            self.new_patches.push(patch);
        }
    }

    pub fn build_plan(self) -> FeaturePackUpdatePlan {
        let new_location = self.new_location.unwrap_or_else(|| self.installed.clone());
        FeaturePackUpdatePlan {
            installed: self.installed,
            new_location,
            new_patches: self.new_patches,
            transitive: self.transitive,
        }
    }
}

/// What would change for a single installed producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePackUpdatePlan {
    installed: FeaturePackLocation,
    new_location: FeaturePackLocation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    new_patches: Vec<FpId>,
    #[serde(default)]
    transitive: bool,
}

impl FeaturePackUpdatePlan {
    /// Start an update request for an installed feature pack
    pub fn request(
        installed: FeaturePackLocation,
        installed_patches: Vec<FpId>,
        transitive: bool,
    ) -> UpdateRequest {
        UpdateRequest {
            installed,
            installed_patches,
            transitive,
            new_location: None,
            new_patches: Vec::new(),
        }
    }

    pub fn installed_location(&self) -> &FeaturePackLocation {
        &self.installed
    }

    pub fn new_location(&self) -> &FeaturePackLocation {
        &self.new_location
    }

    pub fn new_patches(&self) -> &[FpId] {
        &self.new_patches
    }

    pub fn has_new_patches(&self) -> bool {
        !self.new_patches.is_empty()
    }

    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    /// Empty means nothing would change: the new location equals the
    /// installed one and there are no patches to add
    pub fn is_empty(&self) -> bool {
        self.new_location == self.installed && self.new_patches.is_empty()
    }

    pub fn producer(&self) -> ProducerSpec {
        self.installed.producer()
    }
}

/// A batch of layout mutations: installs, uninstalls and updates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    install: Vec<FeaturePackConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    uninstall: Vec<FpId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    updates: Vec<FeaturePackUpdatePlan>,
}

impl ProvisioningPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, config: FeaturePackConfig) -> &mut Self {
        self.install.push(config);
        self
    }

    pub fn uninstall(&mut self, fpid: FpId) -> &mut Self {
        self.uninstall.push(fpid);
        self
    }

    pub fn update(&mut self, plan: FeaturePackUpdatePlan) -> &mut Self {
        self.updates.push(plan);
        self
    }

    pub fn installs(&self) -> &[FeaturePackConfig] {
        &self.install
    }

    pub fn uninstalls(&self) -> &[FpId] {
        &self.uninstall
    }

    pub fn updates(&self) -> &[FeaturePackUpdatePlan] {
        &self.updates
    }

    pub fn has_install(&self) -> bool {
        !self.install.is_empty()
    }

    pub fn has_uninstall(&self) -> bool {
        !self.uninstall.is_empty()
    }

    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.uninstall.is_empty() && self.updates.is_empty()
    }

    /// The updates keyed by producer
    pub fn update_map(&self) -> HashMap<ProducerSpec, &FeaturePackUpdatePlan> {
        self.updates.iter().map(|u| (u.producer(), u)).collect()
    }
}
