// src/layout/handle.rs

//! Reference-counted work area shared by a layout and its transformed views
//!
//! The work area is a temporary directory holding everything a build
//! accumulates: per-feature-pack patched copies under `patched/`, the
//! aggregated plugin artifacts under `plugins/`, the merged resource tree
//! under `resources/`, caller scratch under `tmp/` and the staged output
//! area under `staged/`. Subdirectories are created lazily.
//!
//! Every transformed view of a layout holds another reference; the
//! directory is deleted when the last reference closes. Close never fails:
//! IO errors during cleanup are logged and swallowed.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::location::FpId;
use crate::plugin::{AmbientGuard, DiscoveryContext, FeaturePackPlugin, InstallPlugin, PluginRegistry};
use crate::universe::UniverseResolver;

use super::{PLUGINS, RESOURCES};

pub(crate) const PATCHED: &str = "patched";
pub(crate) const STAGED: &str = "staged";
pub(crate) const TMP: &str = "tmp";

pub(crate) struct Handle {
    refs: Cell<usize>,
    registry: Rc<dyn PluginRegistry>,
    work_dir: RefCell<Option<TempDir>>,
    resources_dir: RefCell<Option<PathBuf>>,
    plugins_dir: RefCell<Option<PathBuf>>,
    discovery: RefCell<Option<Rc<dyn DiscoveryContext>>>,
}

impl Handle {
    pub(crate) fn new(registry: Rc<dyn PluginRegistry>) -> Rc<Self> {
        Rc::new(Self {
            refs: Cell::new(1),
            registry,
            work_dir: RefCell::new(None),
            resources_dir: RefCell::new(None),
            plugins_dir: RefCell::new(None),
            discovery: RefCell::new(None),
        })
    }

    pub(crate) fn increment_refs(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.refs.get() == 0
    }

    /// The work directory, created on first use
    fn work_dir(&self) -> Result<PathBuf> {
        let mut slot = self.work_dir.borrow_mut();
        if slot.is_none() {
            let dir = tempfile::Builder::new().prefix("stevedore-").tempdir()?;
            debug!("created work dir {}", dir.path().display());
            *slot = Some(dir);
        }
        Ok(slot.as_ref().expect("work dir was just created").path().to_path_buf())
    }

    /// Copy a feature pack's `resources/` and `plugins/` subtrees into the
    /// global aggregates, overriding whatever earlier feature packs put
    /// there.
    pub(crate) fn copy_resources(&self, fp_dir: &Path) -> Result<()> {
        let fp_resources = fp_dir.join(RESOURCES);
        if fp_resources.exists() {
            self.copy_into_resources(&fp_resources)?;
        }
        let fp_plugins = fp_dir.join(PLUGINS);
        if fp_plugins.exists() {
            self.copy_into_plugins(&fp_plugins)?;
        }
        Ok(())
    }

    /// Overlay a tree onto the aggregated resource tree
    pub(crate) fn copy_into_resources(&self, src: &Path) -> Result<()> {
        let dst = self.work_dir()?.join(RESOURCES);
        fsutil::copy_recursive(src, &dst)?;
        *self.resources_dir.borrow_mut() = Some(dst);
        Ok(())
    }

    /// Overlay a tree onto the aggregated plugins directory
    pub(crate) fn copy_into_plugins(&self, src: &Path) -> Result<()> {
        let dst = self.work_dir()?.join(PLUGINS);
        fsutil::copy_recursive(src, &dst)?;
        *self.plugins_dir.borrow_mut() = Some(dst);
        Ok(())
    }

    /// Materialize declared plugin artifacts through their artifact
    /// resolvers into the plugins directory
    pub(crate) fn add_plugins<'a>(
        &self,
        plugins: impl IntoIterator<Item = &'a FeaturePackPlugin>,
        universe_resolver: &dyn UniverseResolver,
    ) -> Result<()> {
        let plugins_dir = {
            let mut slot = self.plugins_dir.borrow_mut();
            match &*slot {
                Some(dir) => dir.clone(),
                None => {
                    let dir = self.work_dir()?.join(PLUGINS);
                    fsutil::mkdirs(&dir)?;
                    *slot = Some(dir.clone());
                    dir
                }
            }
        };
        for plugin in plugins {
            let resolver = universe_resolver
                .artifact_resolver(plugin.repo_id())
                .ok_or_else(|| Error::ArtifactResolverMissing(plugin.repo_id().to_string()))?;
            let artifact = resolver.resolve(plugin.location())?;
            fsutil::copy_file(&artifact, &plugins_dir.join(plugin.file_name()))?;
        }
        Ok(())
    }

    /// The staged output directory, emptied if it already exists
    pub(crate) fn new_staged_dir(&self) -> Result<PathBuf> {
        let staged = self.work_dir()?.join(STAGED);
        if staged.exists() {
            fsutil::empty_dir(&staged)?;
        } else {
            fsutil::mkdirs(&staged)?;
        }
        Ok(staged)
    }

    /// The root directory a patched copy of the feature pack goes into
    pub(crate) fn patched_dir(&self, fpid: &FpId) -> Result<PathBuf> {
        let mut dir = self.work_dir()?.join(PATCHED);
        dir.push(
            fpid.producer()
                .universe()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "default".to_string()),
        );
        dir.push(fpid.producer().name());
        dir.push(fpid.channel_name().unwrap_or("default"));
        dir.push(fpid.build().unwrap_or("latest"));
        Ok(dir)
    }

    pub(crate) fn resources_dir(&self) -> Option<PathBuf> {
        self.resources_dir.borrow().clone()
    }

    pub(crate) fn plugins_dir(&self) -> Option<PathBuf> {
        self.plugins_dir.borrow().clone()
    }

    pub(crate) fn resource(&self, path: &[&str]) -> Result<PathBuf> {
        let resources = self.resources_dir().ok_or(Error::ResourcesNotIncluded)?;
        if path.is_empty() {
            return Err(Error::other("resource path is empty"));
        }
        Ok(path.iter().fold(resources, |p, name| p.join(name)))
    }

    pub(crate) fn tmp_path(&self, path: &[&str]) -> Result<PathBuf> {
        let tmp = self.work_dir()?.join(TMP);
        Ok(path.iter().fold(tmp, |p, name| p.join(name)))
    }

    /// Visit every discovered install plugin. The discovery context is the
    /// ambient one for the duration of the visit and is restored on every
    /// exit path.
    pub(crate) fn visit_install_plugins(
        &self,
        visitor: &mut dyn FnMut(&dyn InstallPlugin) -> Result<()>,
    ) -> Result<()> {
        let context = self.discovery_context()?;
        let _ambient = AmbientGuard::enter(context.clone());
        for plugin in context.install_plugins() {
            visitor(plugin.as_ref())?;
        }
        Ok(())
    }

    pub(crate) fn discovery_context(&self) -> Result<Rc<dyn DiscoveryContext>> {
        let mut slot = self.discovery.borrow_mut();
        if let Some(context) = &*slot {
            return Ok(context.clone());
        }
        let plugins_dir = self.plugins_dir();
        let context = self.registry.open(plugins_dir.as_deref())?;
        *slot = Some(context.clone());
        Ok(context)
    }

    /// Clear everything the last build accumulated, keeping the work dir
    /// itself. Used before a rebuild.
    pub(crate) fn reset(&self) {
        *self.discovery.borrow_mut() = None;
        *self.resources_dir.borrow_mut() = None;
        *self.plugins_dir.borrow_mut() = None;
        let mut slot = self.work_dir.borrow_mut();
        if let Some(dir) = &*slot {
            if fsutil::empty_dir(dir.path()).is_err() {
                // could not enumerate the root, drop the whole directory
                slot.take();
            }
        }
    }

    /// Drop one reference; the last close deletes the work directory.
    /// Closing an already-closed handle is a no-op.
    pub(crate) fn close(&self) {
        let refs = self.refs.get();
        if refs == 0 {
            return;
        }
        self.refs.set(refs - 1);
        if refs > 1 {
            return;
        }
        self.reset();
        if let Some(dir) = self.work_dir.borrow_mut().take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                debug!("failed to delete work dir {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::NoPluginRegistry;
    use std::fs;

    fn handle() -> Rc<Handle> {
        Handle::new(Rc::new(NoPluginRegistry))
    }

    #[test]
    fn test_copy_resources_last_writer_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let fp1 = tmp.path().join("fp1");
        let fp2 = tmp.path().join("fp2");
        fs::create_dir_all(fp1.join(RESOURCES)).unwrap();
        fs::create_dir_all(fp2.join(RESOURCES)).unwrap();
        fs::write(fp1.join(RESOURCES).join("x"), "v1").unwrap();
        fs::write(fp2.join(RESOURCES).join("x"), "v2").unwrap();

        let handle = handle();
        handle.copy_resources(&fp1).unwrap();
        handle.copy_resources(&fp2).unwrap();

        let x = handle.resource(&["x"]).unwrap();
        assert_eq!(fs::read_to_string(x).unwrap(), "v2");
        handle.close();
    }

    #[test]
    fn test_resource_without_resources_fails() {
        let handle = handle();
        assert!(matches!(
            handle.resource(&["x"]),
            Err(Error::ResourcesNotIncluded)
        ));
        handle.close();
    }

    #[test]
    fn test_staged_dir_reset_on_acquire() {
        let handle = handle();
        let staged = handle.new_staged_dir().unwrap();
        fs::write(staged.join("out.txt"), "stale").unwrap();
        let staged = handle.new_staged_dir().unwrap();
        assert_eq!(fs::read_dir(&staged).unwrap().count(), 0);
        handle.close();
    }

    #[test]
    fn test_refcount_close() {
        let handle = handle();
        let work_dir = handle.tmp_path(&[]).unwrap().parent().unwrap().to_path_buf();
        fs::create_dir_all(work_dir.join(TMP)).unwrap();
        handle.increment_refs();

        handle.close();
        assert!(work_dir.exists());
        assert!(!handle.is_closed());

        handle.close();
        assert!(!work_dir.exists());
        assert!(handle.is_closed());

        // double close is a no-op
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_reset_keeps_work_dir_root() {
        let handle = handle();
        let staged = handle.new_staged_dir().unwrap();
        let root = staged.parent().unwrap().to_path_buf();
        handle.reset();
        assert!(root.exists());
        assert!(!staged.exists());
        assert!(handle.plugins_dir().is_none());
        handle.close();
    }
}
