// src/universe.rs

//! Resolver adapters for universes, channels and artifacts
//!
//! A universe is a named source of feature-pack producers; each producer
//! publishes builds on named channels. The engine never fetches anything
//! itself: these traits are the boundary to whatever backs the catalogs
//! (a maven repository, a directory tree, an in-memory fixture).

use std::path::PathBuf;
use std::rc::Rc;

use crate::error::Result;
use crate::layout::plan::{FeaturePackUpdatePlan, UpdateRequest};
use crate::location::{FeaturePackLocation, UniverseSpec};

/// A named series of builds within a producer
pub trait Channel {
    fn name(&self) -> &str;

    /// The latest build available on this channel for the location
    fn latest_build(&self, fpl: &FeaturePackLocation) -> Result<String>;

    /// Resolve the location to the feature-pack artifact on disk
    fn resolve(&self, fpl: &FeaturePackLocation) -> Result<PathBuf>;

    /// Whether the location is already resolvable without fetching
    fn is_resolved(&self, fpl: &FeaturePackLocation) -> Result<bool>;

    /// Propose an update for an installed feature pack: when the latest
    /// build differs from the installed one, the plan replaces the build in
    /// the new location. Always returns a plan, possibly an empty one.
    fn update_plan(&self, mut request: UpdateRequest) -> Result<FeaturePackUpdatePlan> {
        let latest = self.latest_build(request.installed_location())?;
        if request.installed_location().build() != Some(latest.as_str()) {
            let new_location = request.installed_location().replace_build(latest);
            request.set_new_location(new_location);
        }
        Ok(request.build_plan())
    }
}

/// A named source of feature-pack producers
pub trait Universe {
    /// Look up a channel of a producer; `channel` of `None` selects the
    /// producer's default channel
    fn channel(&self, producer: &str, channel: Option<&str>) -> Result<Rc<dyn Channel>>;
}

/// Resolves plugin artifacts referenced by feature-pack specs
pub trait ArtifactResolver {
    fn resolve(&self, location: &str) -> Result<PathBuf>;
}

/// The entry point to every universe the installation references
pub trait UniverseResolver {
    /// Open a universe; `spec` of `None` selects the resolver's default
    fn universe(&self, spec: Option<&UniverseSpec>) -> Result<Rc<dyn Universe>>;

    /// The artifact resolver registered under a repository id, if any
    fn artifact_resolver(&self, repo_id: &str) -> Option<Rc<dyn ArtifactResolver>>;

    /// The channel a location refers to, falling back to the producer's
    /// default channel when the location does not name one
    fn channel(&self, fpl: &FeaturePackLocation) -> Result<Rc<dyn Channel>> {
        self.universe(fpl.universe())?
            .channel(fpl.producer_name(), fpl.channel_name())
    }

    /// Resolve the latest build for the location, filling in the channel
    /// name when it was absent
    fn resolve_latest_build(&self, fpl: &FeaturePackLocation) -> Result<FeaturePackLocation> {
        let channel = self.channel(fpl)?;
        let build = channel.latest_build(fpl)?;
        Ok(FeaturePackLocation::new(
            fpl.universe().cloned(),
            fpl.producer_name(),
            Some(channel.name().to_string()),
            fpl.frequency().map(str::to_string),
            Some(build),
        ))
    }
}
