// src/layout/build.rs

//! Layout build: version resolution, convergence and ordering
//!
//! The build is a depth-first traversal of the feature-pack graph driven by
//! the configuration. A *branch* map pins each producer to the id the
//! current DFS path decided on; sibling branches of a diamond converge
//! against those pins. Convergence is deterministic: the first processed
//! build wins, or the build fails if the `version-convergence` option says
//! so. Channel disagreements always fail. Conflicts are accumulated over
//! the whole build and reported once with the full picture.

use std::collections::HashMap;
use std::mem;

use crate::config::{FeaturePackConfig, FeaturePackDeps, ProvisioningConfig};
use crate::error::{Error, Result};
use crate::location::{FeaturePackLocation, FpId, ProducerSpec};
use crate::progress::SilentProgress;
use crate::spec::FeaturePackSpec;
use crate::universe::Channel;

use super::{
    FeaturePackLayout, FpType, ProvisioningLayout, CONFIGS, FEATURES, FEATURE_GROUPS, LAYERS,
    PACKAGES, PLUGINS, RESOURCES,
};
use crate::fsutil;

impl<F: FeaturePackLayout> ProvisioningLayout<F> {
    /// Rebuild the layout against a new configuration, clearing everything
    /// the previous build accumulated
    pub(crate) fn rebuild(
        &mut self,
        config: ProvisioningConfig,
        cleanup_transitive: bool,
    ) -> Result<()> {
        let track_progress = self.feature_packs.is_empty();
        self.arena.clear();
        self.feature_packs.clear();
        self.coordinate_producers.clear();
        self.ordered.clear();
        self.all_patches.clear();
        self.fp_patches.clear();
        self.plugin_locations.clear();
        self.transitive_deps.clear();
        self.resolved_versions.clear();
        self.conflicts.clear();
        self.config = config;
        self.handle.reset();
        self.build_checked(cleanup_transitive, track_progress)
    }

    /// Run the build, closing the work area before propagating a failure
    pub(crate) fn build_checked(
        &mut self,
        cleanup_transitive: bool,
        track_progress: bool,
    ) -> Result<()> {
        let outcome = self.do_build(cleanup_transitive, track_progress);
        if outcome.is_err() {
            self.handle.close();
        }
        outcome
    }

    fn do_build(&mut self, cleanup_transitive: bool, track_progress: bool) -> Result<()> {
        self.build_tracker = Some(if track_progress {
            self.factory.build_tracker()
        } else {
            Box::new(SilentProgress::new())
        });
        if let Some(tracker) = &self.build_tracker {
            tracker.set_message("building provisioning layout");
        }

        let mut branch: HashMap<ProducerSpec, FpId> = HashMap::new();
        let config = self.config.clone();
        self.layout_walk(&config, &mut branch, FpType::DirectDep)?;

        if !self.conflicts.is_empty() {
            return Err(Error::VersionConflict(mem::take(&mut self.conflicts)));
        }

        self.resolve_transitive_leftovers(cleanup_transitive)?;
        self.pin_resolved_versions()?;
        self.apply_patches()?;

        if !self.plugin_locations.is_empty() {
            let plugins: Vec<_> = self.plugin_locations.values().cloned().collect();
            self.handle
                .add_plugins(plugins.iter(), self.factory.universe_resolver())?;
        }

        if let Some(tracker) = self.build_tracker.take() {
            tracker.finish_with_message("provisioning layout complete");
        }
        Ok(())
    }

    /// One traversal step over the dependency declarations of `cfg`:
    /// transitive entries pin the branch, direct entries resolve to feature
    /// packs, then each freshly resolved feature pack recurses into its own
    /// spec before it is appended to the dependency order.
    fn layout_walk(
        &mut self,
        cfg: &dyn FeaturePackDeps,
        branch: &mut HashMap<ProducerSpec, FpId>,
        fp_type: FpType,
    ) -> Result<()> {
        if !cfg.has_feature_pack_deps() {
            return Ok(());
        }
        let mut pinned: Vec<ProducerSpec> = Vec::new();

        for transitive_config in cfg.transitive_deps() {
            let mut fpl = transitive_config.location().clone();
            if transitive_config.has_patches() {
                self.add_patches(transitive_config)?;
            }
            if let Some(branch_id) = branch.get(&fpl.producer()) {
                if branch_id.channel_name() != fpl.channel_name() {
                    self.add_conflict(fpl.fpid(), branch_id.clone());
                }
                continue;
            }
            if fpl.is_coordinates() {
                let f = self.resolve_feature_pack(&fpl, FpType::TransitiveDep, true)?;
                let resolved_fpl = f
                    .spec()
                    .fpid()
                    .to_location(fpl.frequency().map(str::to_string));
                self.register_resolved_version(fpl.producer(), resolved_fpl.clone());
                let idx = self.push_arena(f);
                self.coordinate_producers.insert(fpl.producer(), idx);
                fpl = resolved_fpl;
            }
            let producer = fpl.producer();
            if !self.transitive_deps.contains(&producer) {
                self.transitive_deps.push(producer.clone());
            }
            branch.insert(producer.clone(), fpl.fpid());
            pinned.push(producer);
        }

        let mut queue: Vec<usize> = Vec::new();
        for fp_config in cfg.direct_deps() {
            let mut fpl = fp_config.location().clone();
            if fp_config.has_patches() {
                self.add_patches(fp_config)?;
            }

            let mut branch_id = branch.get(&fpl.producer()).cloned();
            fpl = self.resolve_version(&fpl, branch_id.as_ref())?;

            if !fpl.is_coordinates() {
                if let Some(&existing) = self.feature_packs.get(&fpl.producer()) {
                    let existing_fpid = self.arena[existing].fpid();
                    self.converge(branch_id.as_ref(), &fpl.fpid(), &existing_fpid);
                    continue;
                }
            }

            let mut fp = self.resolve_feature_pack(&fpl, fp_type, true)?;
            let mut alias_producer = None;
            if fpl.is_coordinates() {
                if branch_id.is_none() {
                    branch_id = branch.get(&fp.spec().fpid().producer()).cloned();
                }
                let full_fpl = fp
                    .spec()
                    .fpid()
                    .to_location(fpl.frequency().map(str::to_string));
                let resolved_fpl = self.resolve_version(&full_fpl, branch_id.as_ref())?;
                if let Some(&resolved_idx) = self.feature_packs.get(&resolved_fpl.producer()) {
                    let resolved_fpid = self.arena[resolved_idx].fpid();
                    self.converge(branch_id.as_ref(), &resolved_fpl.fpid(), &resolved_fpid);
                    if fpl != resolved_fpl {
                        self.coordinate_producers
                            .insert(fpl.producer(), resolved_idx);
                    }
                    continue;
                }
                if fpl != resolved_fpl {
                    if branch_id.is_some() {
                        // the branch pinned a different build, resolve again
                        // to honour the pin
                        fp = self.resolve_feature_pack(&resolved_fpl, fp_type, true)?;
                    } else {
                        self.register_resolved_version(fpl.producer(), resolved_fpl.clone());
                    }
                    alias_producer = Some(fpl.producer());
                    fpl = resolved_fpl;
                }
            }

            let idx = self.push_arena(fp);
            self.feature_packs.insert(fpl.producer(), idx);
            if let Some(producer) = alias_producer {
                self.coordinate_producers.insert(producer, idx);
            }
            queue.push(idx);

            let build_pinned = branch_id.as_ref().is_some_and(|id| id.build().is_some());
            if !build_pinned {
                branch.insert(fpl.producer(), fpl.fpid());
                pinned.push(fpl.producer());
            }
        }

        for idx in queue {
            let spec = self.arena[idx].spec().clone();
            self.layout_walk(&spec, branch, FpType::TransitiveDep)?;
            for (id, plugin) in spec.plugins() {
                self.plugin_locations.insert(id.clone(), plugin.clone());
            }
            let dir = self.arena[idx].dir().to_path_buf();
            self.handle.copy_resources(&dir)?;
            self.ordered.push(idx);
        }

        for producer in pinned {
            branch.remove(&producer);
        }
        Ok(())
    }

    fn push_arena(&mut self, fp: F) -> usize {
        self.arena.push(fp);
        self.arena.len() - 1
    }

    /// Resolve a feature-pack archive and construct the layout type.
    /// With `translate`, coordinate-form dependencies declared by its spec
    /// are rewritten to their resolved locations.
    fn resolve_feature_pack(
        &mut self,
        fpl: &FeaturePackLocation,
        fp_type: FpType,
        translate: bool,
    ) -> Result<F> {
        if let Some(tracker) = &self.build_tracker {
            tracker.set_message(&fpl.to_string());
        }
        let resolved = self.factory.resolve_feature_pack(fpl)?;
        if let Some(tracker) = &self.build_tracker {
            tracker.increment(1);
        }
        let spec = if translate {
            self.translate_spec(resolved.spec)?
        } else {
            resolved.spec
        };
        self.fp_factory
            .new_feature_pack(resolved.location, spec, resolved.dir, fp_type)
    }

    /// Rewrite coordinate-form dependencies of a spec to the locations they
    /// resolve to, preserving declaration order exactly. Returns the spec
    /// unchanged when nothing had to be rewritten.
    fn translate_spec(&mut self, spec: FeaturePackSpec) -> Result<FeaturePackSpec> {
        let mut changed = false;
        let mut transitive = Vec::with_capacity(spec.transitive_deps().len());
        for dep in spec.transitive_deps() {
            transitive.push(self.translate_dep(dep, true, &mut changed)?);
        }
        let mut direct = Vec::with_capacity(spec.direct_deps().len());
        for dep in spec.direct_deps() {
            direct.push(self.translate_dep(dep, false, &mut changed)?);
        }
        if !changed {
            return Ok(spec);
        }
        let mut rebuilder = FeaturePackSpec::builder(spec.fpid().clone());
        for name in spec.default_packages() {
            rebuilder = rebuilder.add_default_package(name.clone());
        }
        for plugin in spec.plugins().values() {
            rebuilder = rebuilder.add_plugin(plugin.clone());
        }
        if let Some(target) = spec.patch_for() {
            rebuilder = rebuilder.set_patch_for(target.clone());
        }
        for dep in transitive.into_iter().chain(direct) {
            rebuilder = rebuilder.add_feature_pack_dep(dep)?;
        }
        Ok(rebuilder.build())
    }

    fn translate_dep(
        &mut self,
        dep: &FeaturePackConfig,
        transitive: bool,
        changed: &mut bool,
    ) -> Result<FeaturePackConfig> {
        if !dep.location().is_coordinates() {
            return Ok(dep.clone());
        }
        let resolved = self.factory.resolve_feature_pack(dep.location())?;
        let resolved_fpl = resolved
            .spec
            .fpid()
            .to_location(dep.location().frequency().map(str::to_string));
        if resolved_fpl.is_coordinates() {
            return Ok(dep.clone());
        }
        *changed = true;
        let builder = if transitive {
            FeaturePackConfig::transitive_builder(resolved_fpl)
        } else {
            FeaturePackConfig::builder(resolved_fpl)
        };
        Ok(builder.init(dep).build())
    }

    /// Pick the effective location for a direct entry against the branch
    /// pin: a matching pin substitutes its build, a pin on a different
    /// channel is a conflict and wins
    fn resolve_version(
        &mut self,
        fpl: &FeaturePackLocation,
        branch_id: Option<&FpId>,
    ) -> Result<FeaturePackLocation> {
        let Some(branch_id) = branch_id else {
            return self.normalize(fpl);
        };
        if branch_id.channel_name().is_none() || branch_id.channel_name() == fpl.channel_name() {
            return match branch_id.build() {
                None => self.normalize(fpl),
                Some(build) => Ok(if fpl.build() == Some(build) {
                    fpl.clone()
                } else {
                    fpl.replace_build(build)
                }),
            };
        }
        self.add_conflict(fpl.fpid(), branch_id.clone());
        Ok(branch_id.location())
    }

    /// Fill in the channel and build of an incomplete location, resolving
    /// "latest" through the channel and recording the pin so it can be
    /// written back into the configuration after the build
    fn normalize(&mut self, fpl: &FeaturePackLocation) -> Result<FeaturePackLocation> {
        if fpl.is_coordinates() {
            return Ok(fpl.clone());
        }
        if fpl.channel_name().is_some() {
            if fpl.has_build() {
                return Ok(fpl.clone());
            }
            let channel = self.factory.universe_resolver().channel(fpl)?;
            return self.resolve_latest_build(fpl, channel.as_ref());
        }
        let channel = self.factory.universe_resolver().channel(fpl)?;
        if fpl.has_build() {
            let updated = FeaturePackLocation::new(
                fpl.universe().cloned(),
                fpl.producer_name(),
                Some(channel.name().to_string()),
                fpl.frequency().map(str::to_string),
                fpl.build().map(str::to_string),
            );
            self.register_resolved_version(fpl.producer(), updated.clone());
            return Ok(updated);
        }
        self.resolve_latest_build(fpl, channel.as_ref())
    }

    fn resolve_latest_build(
        &mut self,
        fpl: &FeaturePackLocation,
        channel: &dyn Channel,
    ) -> Result<FeaturePackLocation> {
        let latest = FeaturePackLocation::new(
            fpl.universe().cloned(),
            fpl.producer_name(),
            Some(channel.name().to_string()),
            fpl.frequency().map(str::to_string),
            Some(channel.latest_build(fpl)?),
        );
        channel.resolve(&latest)?;
        self.register_resolved_version(fpl.producer(), latest.clone());
        Ok(latest)
    }

    /// Record a "latest" resolution, keeping first-resolution order so the
    /// rebuilt configuration pins versions deterministically
    fn register_resolved_version(&mut self, producer: ProducerSpec, fpl: FeaturePackLocation) {
        match self
            .resolved_versions
            .iter_mut()
            .find(|(p, _)| p == &producer)
        {
            Some(entry) => entry.1 = fpl,
            None => self.resolved_versions.push((producer, fpl)),
        }
    }

    /// Decide whether an already-registered feature pack satisfies another
    /// path's requirement. With a build pinned on the branch there is
    /// nothing to decide; a channel mismatch is always a conflict; a build
    /// mismatch is one only under fail-on-convergence.
    fn converge(&mut self, branch_id: Option<&FpId>, current: &FpId, effective: &FpId) {
        if branch_id.is_some_and(|id| id.build().is_some()) || current == effective {
            return;
        }
        if current.channel_name() != effective.channel_name() {
            self.add_conflict(current.clone(), effective.clone());
            return;
        }
        if self.fail_on_convergence && current.build() != effective.build() {
            self.add_conflict(current.clone(), effective.clone());
        }
    }

    fn add_conflict(&mut self, current: FpId, effective: FpId) {
        let producer = effective.producer();
        if let Some((_, ids)) = self.conflicts.iter_mut().find(|(p, _)| p == &producer) {
            if !ids.contains(&current) {
                ids.push(current);
            }
            return;
        }
        self.conflicts
            .push((current.producer(), vec![effective, current]));
    }

    fn add_patches(&mut self, fp_config: &FeaturePackConfig) -> Result<()> {
        for patch_id in fp_config.patches() {
            if self.all_patches.contains_key(patch_id) {
                continue;
            }
            self.load_patch(patch_id.clone())?;
        }
        Ok(())
    }

    /// Load a patch feature pack, the patches it depends on, and append it
    /// to its target's patch stack. A patch is loaded at most once.
    fn load_patch(&mut self, patch_id: FpId) -> Result<()> {
        let fp = self.resolve_feature_pack(&patch_id.location(), FpType::Patch, false)?;
        if !fp.spec().is_patch() {
            return Err(Error::NotAPatch(patch_id));
        }
        let spec = fp.spec().clone();
        let idx = self.push_arena(fp);
        self.all_patches.insert(patch_id, idx);
        for dep in spec.direct_deps() {
            let dep_id = dep.location().fpid();
            if self.all_patches.contains_key(&dep_id) {
                continue;
            }
            self.load_patch(dep_id)?;
        }
        let target = spec.patch_for().expect("is_patch checked above").clone();
        self.fp_patches.entry(target).or_default().push(idx);
        Ok(())
    }

    /// Producers referenced transitively that the traversal never
    /// materialized either get dropped from the configuration (cleanup) or
    /// fail the build, batched into a single error
    fn resolve_transitive_leftovers(&mut self, cleanup_transitive: bool) -> Result<()> {
        if self.transitive_deps.is_empty() {
            return Ok(());
        }
        let mut new_config = None;
        let mut not_found: Vec<ProducerSpec> = Vec::new();
        for producer in mem::take(&mut self.transitive_deps) {
            if self.feature_packs.contains_key(&producer) {
                continue;
            }
            if cleanup_transitive && self.config.has_transitive_dep(&producer) {
                new_config
                    .get_or_insert_with(|| self.config.to_builder())
                    .remove_transitive_dep(&producer)?;
                continue;
            }
            not_found.push(producer);
        }
        if !not_found.is_empty() {
            return Err(Error::TransitiveDependencyNotFound(not_found));
        }
        if let Some(builder) = new_config {
            self.config = builder.build();
        }
        Ok(())
    }

    /// Rebuild the configuration so references that were resolved to
    /// "latest" during this build are pinned for the next one. Pins without
    /// an explicit entry become transitive entries.
    fn pin_resolved_versions(&mut self) -> Result<()> {
        if self.resolved_versions.is_empty() {
            return Ok(());
        }
        let mut remaining = mem::take(&mut self.resolved_versions);
        let take = |remaining: &mut Vec<(ProducerSpec, FeaturePackLocation)>,
                    producer: &ProducerSpec| {
            remaining
                .iter()
                .position(|(p, _)| p == producer)
                .map(|pos| remaining.remove(pos).1)
        };

        let mut builder = ProvisioningConfig::builder();
        builder.add_options(self.config.options());
        builder.init_universes(&self.config);
        for dep in self.config.direct_deps() {
            match take(&mut remaining, &dep.producer()) {
                Some(fpl) => {
                    builder
                        .add_feature_pack_dep(FeaturePackConfig::builder(fpl).init(dep).build())?;
                }
                None => {
                    builder.add_feature_pack_dep(dep.clone())?;
                }
            }
        }
        for dep in self.config.transitive_deps() {
            match take(&mut remaining, &dep.producer()) {
                Some(fpl) => {
                    builder.add_feature_pack_dep(
                        FeaturePackConfig::transitive_builder(fpl).init(dep).build(),
                    )?;
                }
                None => {
                    builder.add_feature_pack_dep(dep.clone())?;
                }
            }
        }
        for (producer, fpl) in remaining {
            match builder.transitive_dep(&producer).cloned() {
                None => {
                    builder.add_feature_pack_dep(
                        FeaturePackConfig::transitive_builder(fpl).build(),
                    )?;
                }
                Some(existing) if !existing.location().has_build() => {
                    builder.update_feature_pack_dep(
                        FeaturePackConfig::transitive_builder(fpl)
                            .init(&existing)
                            .build(),
                    )?;
                }
                Some(_) => {}
            }
        }
        self.config = builder.build();
        Ok(())
    }

    /// Overlay loaded patches onto per-feature-pack patched copies and
    /// re-aggregate resources so patch content shadows base content while
    /// the dependency-order last-writer rule still holds
    fn apply_patches(&mut self) -> Result<()> {
        if self.fp_patches.is_empty() {
            return Ok(());
        }
        for idx in self.ordered.clone() {
            let fpid = self.arena[idx].fpid();
            let Some(patch_idxs) = self.fp_patches.get(&fpid).cloned() else {
                let spec = self.arena[idx].spec().clone();
                for (id, plugin) in spec.plugins() {
                    self.plugin_locations.insert(id.clone(), plugin.clone());
                }
                let dir = self.arena[idx].dir().to_path_buf();
                let resources = dir.join(RESOURCES);
                if resources.exists() {
                    self.handle.copy_into_resources(&resources)?;
                }
                let plugins = dir.join(PLUGINS);
                if plugins.exists() {
                    self.handle.copy_into_plugins(&plugins)?;
                }
                continue;
            };

            let patched_dir = self.handle.patched_dir(&fpid)?;
            fsutil::mkdirs(&patched_dir)?;
            let base_dir = self.arena[idx].dir().to_path_buf();
            fsutil::copy_recursive(&base_dir, &patched_dir)?;
            self.arena[idx].set_dir(patched_dir.clone());

            for patch_idx in patch_idxs {
                let patch_dir = self.arena[patch_idx].dir().to_path_buf();
                for subdir in [PACKAGES, FEATURES, FEATURE_GROUPS, CONFIGS, LAYERS] {
                    let patch_content = patch_dir.join(subdir);
                    if patch_content.exists() {
                        fsutil::copy_recursive(&patch_content, &patched_dir.join(subdir))?;
                    }
                }
                let patch_plugins = patch_dir.join(PLUGINS);
                if patch_plugins.exists() {
                    fsutil::copy_recursive(&patch_plugins, &patched_dir.join(PLUGINS))?;
                    self.handle.copy_into_plugins(&patch_plugins)?;
                }
                let patch_resources = patch_dir.join(RESOURCES);
                if patch_resources.exists() {
                    fsutil::copy_recursive(&patch_resources, &patched_dir.join(RESOURCES))?;
                    self.handle.copy_into_resources(&patch_resources)?;
                }
                let patch_spec = self.arena[patch_idx].spec().clone();
                for (id, plugin) in patch_spec.plugins() {
                    self.plugin_locations.insert(id.clone(), plugin.clone());
                }
            }
        }
        Ok(())
    }
}
