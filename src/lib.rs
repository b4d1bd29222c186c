// src/lib.rs

//! Stevedore - feature-pack provisioning layout engine
//!
//! Given a declarative installation configuration referencing versioned
//! feature packs, stevedore resolves their concrete builds against upstream
//! catalogs, lays them out on disk in dependency order, applies patches and
//! aggregates their resources and plugin artifacts. The laid-out tree and
//! the configuration stay in sync through incremental mutation
//! (install / uninstall / apply-plan / update queries).
//!
//! # Architecture
//!
//! - Immutable location and configuration models with builders
//! - Resolver adapters: universes, channels and artifact resolvers are
//!   external interfaces the engine delegates to
//! - A reference-counted work area shared by transformed views of a layout
//! - Deterministic version convergence: first-processed wins, or fail,
//!   decided by the `version-convergence` option

pub mod config;
mod error;
pub mod fsutil;
pub mod layout;
pub mod location;
pub mod options;
pub mod plugin;
pub mod progress;
pub mod spec;
pub mod universe;

pub use config::{FeaturePackConfig, FeaturePackDeps, ProvisioningConfig};
pub use error::{Error, Result};
pub use layout::plan::{FeaturePackUpdatePlan, ProvisioningPlan, UpdateRequest};
pub use layout::{
    DefaultFpFactory, FeaturePack, FeaturePackLayout, FeaturePackLayoutFactory, FpType,
    LayoutFactory, ProvisioningLayout, ResolvedFeaturePack,
};
pub use location::{FeaturePackLocation, FpId, ProducerSpec, UniverseSpec};
pub use options::{ProvisioningOption, FAIL, FIRST_PROCESSED, VERSION_CONVERGENCE};
pub use plugin::{
    DiscoveryContext, FeaturePackPlugin, InstallPlugin, NoPluginRegistry, PluginRegistry,
    StaticPluginRegistry,
};
pub use progress::{CliProgress, LogProgress, ProgressStyle, ProgressTracker, SilentProgress};
pub use spec::{FeaturePackSpec, FeaturePackSpecBuilder};
pub use universe::{ArtifactResolver, Channel, Universe, UniverseResolver};
