// src/error.rs

//! Error types for the provisioning engine
//!
//! A single `Error` enum covers every failure the engine can report,
//! discriminated by reason. Version conflicts and unsatisfied transitive
//! dependencies are accumulated over a whole build and reported once with
//! the full picture; everything else is raised at first detection.

use std::path::PathBuf;

use thiserror::Error;

use crate::location::{FpId, ProducerSpec};

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or mutating a provisioning layout
#[derive(Error, Debug)]
pub enum Error {
    /// Feature pack is not part of the installation
    #[error("{0} is not installed")]
    UnknownFeaturePack(FpId),

    /// Producer is required by the installation but has no direct entry
    #[error("feature pack {0} is a dependency of the installation and cannot be uninstalled")]
    UnsatisfiedFeaturePackDependency(ProducerSpec),

    /// The same patch was applied twice
    #[error("patch {0} is already applied")]
    PatchAlreadyApplied(FpId),

    /// Patch declares a target that is not installed
    #[error("patch {patch} does not apply to the installed state, its target is {target}")]
    PatchNotApplicable { patch: FpId, target: FpId },

    /// A feature pack listed as a patch is not one
    #[error("{0} is not a patch but is listed as one")]
    NotAPatch(FpId),

    /// Builds or channels disagreed during version convergence
    ///
    /// Each entry names a producer and the full set of feature-pack ids
    /// that disagreed about it, in the order they were discovered.
    #[error("feature pack version check failed: {}", format_conflicts(.0))]
    VersionConflict(Vec<(ProducerSpec, Vec<FpId>)>),

    /// Transitive entries of the configuration were never reached by the traversal
    #[error("transitive dependencies not found in the configuration: {}", format_producers(.0))]
    TransitiveDependencyNotFound(Vec<ProducerSpec>),

    /// A required provisioning option was left unset
    #[error("provisioning option {0} is required")]
    PluginOptionRequired(String),

    /// A provisioning option was set to a value outside its allowed set
    #[error("provisioning option {name} value {value} is not one of {}", allowed.join(", "))]
    PluginOptionIllegalValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    /// Options were set that no plugin or built-in option claims
    #[error("provisioning options not recognized: {}", .0.join(", "))]
    PluginOptionsNotRecognized(Vec<String>),

    /// A plugin artifact references a repository with no configured resolver
    #[error("artifact resolver {0} has not been configured")]
    ArtifactResolverMissing(String),

    /// Plan location does not match the installed location
    #[error("location in the update plan {planned} does not match the installed location {installed}")]
    UpdatePlanMismatch { planned: String, installed: String },

    /// The layout does not include any resources
    #[error("the installation does not include resources")]
    ResourcesNotIncluded,

    /// Location string could not be parsed
    #[error("failed to parse feature pack location '{input}': {reason}")]
    LocationSyntax { input: String, reason: String },

    /// Copying a file or directory tree failed
    #[error("failed to copy {} to {}", src.display(), dst.display())]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating a directory failed
    #[error("failed to create directory {}", path.display())]
    MkdirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a directory failed
    #[error("failed to read directory {}", path.display())]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error outside the copy/mkdir/readdir paths
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic provisioning error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new "other" error with a message
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

fn format_conflicts(conflicts: &[(ProducerSpec, Vec<FpId>)]) -> String {
    let mut buf = String::new();
    for (i, (producer, ids)) in conflicts.iter().enumerate() {
        if i > 0 {
            buf.push_str("; ");
        }
        buf.push_str(&producer.to_string());
        buf.push_str(" -> [");
        for (j, id) in ids.iter().enumerate() {
            if j > 0 {
                buf.push_str(", ");
            }
            buf.push_str(&id.to_string());
        }
        buf.push(']');
    }
    buf
}

fn format_producers(producers: &[ProducerSpec]) -> String {
    producers
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
