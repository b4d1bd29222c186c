// src/plugin.rs

//! Plugin discovery over the aggregated plugins directory
//!
//! Feature packs declare plugin artifacts; the layout materializes them into
//! its `plugins/` directory and discovers install plugins from there through
//! a [`PluginRegistry`]. Discovery itself (reading archives, instantiating
//! plugin code) is an external concern; the engine only drives the visitation
//! and maintains the ambient discovery context.
//!
//! While plugins are being visited, the discovery context is installed as
//! the ambient one so plugin code can reach back into it. The previous
//! ambient context is restored on every exit path, including failures, via
//! an RAII guard.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::options::ProvisioningOption;

/// A plugin artifact declared by a feature-pack spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePackPlugin {
    id: String,
    repo_id: String,
    location: String,
}

impl FeaturePackPlugin {
    pub fn new(
        id: impl Into<String>,
        repo_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            repo_id: repo_id.into(),
            location: location.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Repository the artifact resolver for this plugin is registered under
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Artifact coordinates understood by the repository's resolver
    pub fn location(&self) -> &str {
        &self.location
    }

    /// File name the materialized artifact gets in the plugins directory
    pub fn file_name(&self) -> String {
        if self.id.ends_with(".jar") {
            self.id.clone()
        } else {
            format!("{}.jar", self.id)
        }
    }
}

/// An install plugin discovered from the plugins directory
pub trait InstallPlugin {
    /// Options this plugin recognizes, keyed by name
    fn options(&self) -> BTreeMap<String, ProvisioningOption> {
        BTreeMap::new()
    }
}

/// A discovery context opened over a plugins directory
pub trait DiscoveryContext {
    fn install_plugins(&self) -> Vec<Rc<dyn InstallPlugin>>;
}

/// Opens discovery contexts over a plugins directory
pub trait PluginRegistry {
    fn open(&self, plugins_dir: Option<&Path>) -> Result<Rc<dyn DiscoveryContext>>;
}

struct EmptyContext;

impl DiscoveryContext for EmptyContext {
    fn install_plugins(&self) -> Vec<Rc<dyn InstallPlugin>> {
        Vec::new()
    }
}

/// Registry that never discovers anything
pub struct NoPluginRegistry;

impl PluginRegistry for NoPluginRegistry {
    fn open(&self, _plugins_dir: Option<&Path>) -> Result<Rc<dyn DiscoveryContext>> {
        Ok(Rc::new(EmptyContext))
    }
}

/// Registry backed by a fixed plugin set, independent of the directory
/// contents. Useful for embedders that link their plugins statically.
pub struct StaticPluginRegistry {
    plugins: Vec<Rc<dyn InstallPlugin>>,
}

impl StaticPluginRegistry {
    pub fn new(plugins: Vec<Rc<dyn InstallPlugin>>) -> Self {
        Self { plugins }
    }
}

struct StaticContext {
    plugins: Vec<Rc<dyn InstallPlugin>>,
}

impl DiscoveryContext for StaticContext {
    fn install_plugins(&self) -> Vec<Rc<dyn InstallPlugin>> {
        self.plugins.clone()
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn open(&self, plugins_dir: Option<&Path>) -> Result<Rc<dyn DiscoveryContext>> {
        let plugins = match plugins_dir {
            Some(_) => self.plugins.clone(),
            None => Vec::new(),
        };
        Ok(Rc::new(StaticContext { plugins }))
    }
}

thread_local! {
    static AMBIENT: RefCell<Vec<Rc<dyn DiscoveryContext>>> = const { RefCell::new(Vec::new()) };
}

/// The discovery context currently installed by an in-flight plugin visit
pub fn ambient_context() -> Option<Rc<dyn DiscoveryContext>> {
    AMBIENT.with(|stack| stack.borrow().last().cloned())
}

/// Scoped installation of a discovery context as the ambient one.
/// Dropping the guard restores the previous context.
pub(crate) struct AmbientGuard;

impl AmbientGuard {
    pub(crate) fn enter(context: Rc<dyn DiscoveryContext>) -> Self {
        AMBIENT.with(|stack| stack.borrow_mut().push(context));
        AmbientGuard
    }
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        AMBIENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
