// src/layout/mutation.rs

//! Incremental layout mutation
//!
//! Every mutation follows the same shape: edit a copy of the configuration
//! through its builder, rebuild the layout against the new configuration,
//! then re-run option reconciliation. Installing a patch attaches it to its
//! target's entry; installing an already-installed producer updates it in
//! place or moves it between the direct and transitive sections.

use std::collections::{BTreeMap, HashSet};

use crate::config::{FeaturePackConfig, FeaturePackDeps, ProvisioningConfigBuilder};
use crate::error::{Error, Result};
use crate::location::{FeaturePackLocation, FpId, ProducerSpec};

use super::plan::ProvisioningPlan;
use super::{FeaturePackLayout, ProvisioningLayout};

impl<F: FeaturePackLayout> ProvisioningLayout<F> {
    /// Add a feature pack to the configuration and rebuild the layout
    pub fn install_location(&mut self, fpl: FeaturePackLocation) -> Result<()> {
        self.install(FeaturePackConfig::for_location(fpl))
    }

    /// Add a feature pack to the configuration and rebuild the layout
    pub fn install(&mut self, fp_config: FeaturePackConfig) -> Result<()> {
        self.install_with_options(fp_config, BTreeMap::new())
    }

    pub fn install_with_options(
        &mut self,
        fp_config: FeaturePackConfig,
        extra_options: BTreeMap<String, String>,
    ) -> Result<()> {
        let config = self.config.clone();
        self.init_built_in_options(&config, &extra_options)?;
        let mut builder = config.to_builder();
        self.install_into(fp_config, &mut builder)?;
        self.rebuild(builder.build(), false)?;
        self.init_plugin_options(&extra_options, false)
    }

    /// Remove a feature pack (or detach a patch) and rebuild the layout
    pub fn uninstall(&mut self, fpid: FpId) -> Result<()> {
        self.uninstall_with_options(fpid, BTreeMap::new())
    }

    pub fn uninstall_with_options(
        &mut self,
        fpid: FpId,
        extra_options: BTreeMap<String, String>,
    ) -> Result<()> {
        let config = self.config.clone();
        self.init_built_in_options(&config, &extra_options)?;
        let mut builder = config.to_builder();
        self.uninstall_from(&fpid, &mut builder)?;
        self.rebuild(builder.build(), true)?;
        self.init_plugin_options(&extra_options, true)
    }

    /// Apply a batch of updates, installs and uninstalls, then rebuild
    pub fn apply(&mut self, plan: &ProvisioningPlan) -> Result<()> {
        self.apply_with_options(plan, BTreeMap::new())
    }

    pub fn apply_with_options(
        &mut self,
        plan: &ProvisioningPlan,
        extra_options: BTreeMap<String, String>,
    ) -> Result<()> {
        if plan.is_empty() {
            let config = self.config.clone();
            self.init_built_in_options(&config, &extra_options)?;
            self.rebuild(config, true)?;
            return self.init_plugin_options(&extra_options, plan.has_uninstall());
        }

        let mut builder = self.config.to_builder();

        if plan.has_updates() {
            let updates = plan.update_map();
            let mut processed: HashSet<ProducerSpec> = HashSet::new();

            for fp_config in self.config.direct_deps().to_vec() {
                let producer = fp_config.producer();
                let Some(update) = updates.get(&producer).filter(|u| !u.is_empty()) else {
                    continue;
                };
                if update.installed_location() != fp_config.location() {
                    return Err(Error::UpdatePlanMismatch {
                        planned: update.installed_location().to_string(),
                        installed: fp_config.location().to_string(),
                    });
                }
                let mut updated =
                    FeaturePackConfig::builder(update.new_location().clone()).init(&fp_config);
                for patch in update.new_patches() {
                    updated = updated.add_patch(patch.clone());
                }
                builder.update_feature_pack_dep(updated.build())?;
                processed.insert(producer);
            }

            for fp_config in self.config.transitive_deps().to_vec() {
                let producer = fp_config.producer();
                let Some(update) = updates.get(&producer).filter(|u| !u.is_empty()) else {
                    continue;
                };
                if fp_config.location().has_build()
                    && update.installed_location() != fp_config.location()
                {
                    return Err(Error::UpdatePlanMismatch {
                        planned: update.installed_location().to_string(),
                        installed: fp_config.location().to_string(),
                    });
                }
                let mut updated = FeaturePackConfig::transitive_builder(
                    update.new_location().clone(),
                )
                .init(&fp_config);
                for patch in update.new_patches() {
                    updated = updated.add_patch(patch.clone());
                }
                builder.update_feature_pack_dep(updated.build())?;
                processed.insert(producer);
            }

            // updates for producers the configuration does not mention
            // become new transitive entries
            if processed.len() < updates.len() {
                for update in plan.updates() {
                    if processed.contains(&update.producer()) {
                        continue;
                    }
                    let mut added =
                        FeaturePackConfig::transitive_builder(update.new_location().clone());
                    for patch in update.new_patches() {
                        added = added.add_patch(patch.clone());
                    }
                    builder.add_feature_pack_dep(added.build())?;
                }
            }
        }

        for fp_config in plan.installs() {
            self.install_into(fp_config.clone(), &mut builder)?;
        }
        for fpid in plan.uninstalls() {
            self.uninstall_from(fpid, &mut builder)?;
        }

        let config = builder.build();
        self.init_built_in_options(&config, &extra_options)?;
        self.rebuild(config, true)?;
        self.init_plugin_options(&extra_options, plan.has_uninstall())
    }

    fn install_into(
        &mut self,
        fp_config: FeaturePackConfig,
        builder: &mut ProvisioningConfigBuilder,
    ) -> Result<()> {
        let mut fp_config = fp_config;
        let mut fpl = fp_config.location().clone();
        if !fpl.has_build() && !fpl.is_coordinates() {
            fpl = self.universe_resolver().resolve_latest_build(&fpl)?;
        }

        let resolved = self.factory.resolve_feature_pack(&fpl)?;
        let spec = resolved.spec;
        let fpid = spec.fpid().clone();

        if spec.is_patch() {
            if self.all_patches.contains_key(&fpid) {
                return Err(Error::PatchAlreadyApplied(fpid));
            }
            let target = spec.patch_for().expect("patch spec has a target").clone();
            let applicable = self
                .feature_packs
                .get(&target.producer())
                .is_some_and(|&idx| self.arena[idx].fpid() == target);
            if !applicable {
                return Err(Error::PatchNotApplicable {
                    patch: fpid,
                    target,
                });
            }
            let installed_config = self
                .config
                .feature_pack_dep(&target.producer())
                .or_else(|| self.config.transitive_dep(&target.producer()));
            match installed_config {
                None => {
                    builder.add_feature_pack_dep(
                        FeaturePackConfig::transitive_builder(target.location())
                            .add_patch(fpid)
                            .build(),
                    )?;
                }
                Some(installed) => {
                    builder.update_feature_pack_dep(
                        installed.to_builder().add_patch(fpid).build(),
                    )?;
                }
            }
            return Ok(());
        }

        if fpl.is_coordinates() {
            fpl = fpid.to_location(fpl.frequency().map(str::to_string));
            let rebuilt = if fp_config.is_transitive() {
                FeaturePackConfig::transitive_builder(fpl.clone())
            } else {
                FeaturePackConfig::builder(fpl.clone())
            };
            fp_config = rebuilt.init(&fp_config).build();
        }

        if let Some(&idx) = self.feature_packs.get(&fpid.producer()) {
            let installed = &self.arena[idx];
            if installed.is_transitive_dep() == fp_config.is_transitive() {
                builder.update_feature_pack_dep(fp_config)?;
                return Ok(());
            }
            if installed.is_transitive_dep() {
                // transitive becomes direct: insert at the earliest position
                // existing direct dependents still see it before themselves
                if self.config.has_transitive_dep(&fpid.producer()) {
                    builder.remove_transitive_dep(&fpid.producer())?;
                }
                let index = self.index_for_dep_to_install(builder, &fpid.producer())?;
                builder.add_feature_pack_dep_at(index, fp_config)?;
                return Ok(());
            }
            // direct becomes transitive
            builder.remove_feature_pack_dep(&fpid.producer())?;
        }
        builder.add_feature_pack_dep(fp_config)?;
        Ok(())
    }

    /// The insertion index for a producer being promoted to a direct entry:
    /// the minimum index of any direct entry whose feature pack depends on
    /// the promoted producer
    fn index_for_dep_to_install(
        &self,
        builder: &ProvisioningConfigBuilder,
        producer: &ProducerSpec,
    ) -> Result<usize> {
        let mut index = usize::MAX;
        let mut visited: HashSet<ProducerSpec> = HashSet::new();
        visited.insert(producer.clone());
        for f in self.ordered_feature_packs() {
            if !f.is_transitive_dep() && self.depends_on(f, producer, &mut visited) {
                index = index.min(builder.fp_dep_index(&f.fpid().producer())?);
            }
        }
        Ok(index)
    }

    fn depends_on(&self, f: &F, dep: &ProducerSpec, visited: &mut HashSet<ProducerSpec>) -> bool {
        let spec = f.spec();
        if !spec.has_feature_pack_deps() {
            return false;
        }
        if spec.has_direct_dep(dep) || spec.has_transitive_dep(dep) {
            return true;
        }
        for fp_config in spec.direct_deps() {
            let producer = fp_config.producer();
            if !visited.insert(producer.clone()) {
                continue;
            }
            if let Some(&idx) = self.feature_packs.get(&producer) {
                if self.depends_on(&self.arena[idx], dep, visited) {
                    return true;
                }
            }
            visited.remove(&producer);
        }
        false
    }

    fn uninstall_from(
        &mut self,
        fpid: &FpId,
        builder: &mut ProvisioningConfigBuilder,
    ) -> Result<()> {
        if let Some(&patch_idx) = self.all_patches.get(fpid) {
            let target = self.arena[patch_idx]
                .spec()
                .patch_for()
                .expect("loaded patch has a target")
                .producer();
            let target_config = self
                .config
                .feature_pack_dep(&target)
                .or_else(|| self.config.transitive_dep(&target))
                .ok_or_else(|| {
                    Error::other(format!(
                        "target feature-pack for patch {} could not be found",
                        fpid
                    ))
                })?;
            builder
                .update_feature_pack_dep(target_config.to_builder().remove_patch(fpid).build())?;
            return Ok(());
        }

        let producer = fpid.producer();
        let installed_fpid = match self.feature_packs.get(&producer) {
            Some(&idx) => self.arena[idx].fpid(),
            None => return Err(Error::UnknownFeaturePack(fpid.clone())),
        };
        if fpid.build().is_some() && installed_fpid.build() != fpid.build() {
            return Err(Error::UnknownFeaturePack(fpid.clone()));
        }
        if self.config.feature_pack_dep(&producer).is_none() {
            return Err(Error::UnsatisfiedFeaturePackDependency(producer));
        }
        builder.remove_feature_pack_dep(&producer)?;
        if !builder.has_feature_pack_deps() {
            builder.clear_feature_pack_deps();
            builder.clear_options();
        }
        Ok(())
    }
}
