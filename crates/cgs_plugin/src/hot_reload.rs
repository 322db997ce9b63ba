//! Hot reload of dynamic plugins.
//!
//! Watches each registered plugin's shared library and, when a rebuilt
//! library settles on disk, drives [`PluginManager::reload`] for it. State
//! is carried across the reload by the plugin's own
//! `capture_state` / `restore_state` hooks.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{info, warn};

use cgs_foundation::error::{CgsError, CgsResult};

use crate::manager::PluginManager;
use crate::watcher::FileWatcher;

/// Watches plugin libraries and reloads them when they change on disk.
pub struct HotReloadManager {
    watcher: FileWatcher,
    plugins_by_path: HashMap<PathBuf, String>,
}

impl HotReloadManager {
    pub fn new() -> Self {
        Self {
            watcher: FileWatcher::new(),
            plugins_by_path: HashMap::new(),
        }
    }

    /// Enables hot reload for a dynamic plugin already in the manager.
    ///
    /// # Errors
    /// Returns [`CgsError::PluginNotFound`] when the manager does not know
    /// the plugin, or [`CgsError::InvalidArgument`] for static plugins.
    pub fn track(&mut self, manager: &PluginManager, name: &str) -> CgsResult<()> {
        if manager.state(name).is_none() {
            return Err(CgsError::PluginNotFound(name.to_string()));
        }
        let path = manager.library_path(name).ok_or_else(|| {
            CgsError::InvalidArgument(format!("plugin '{name}' is static, cannot hot reload"))
        })?;
        self.watcher.watch(path.clone());
        self.plugins_by_path.insert(path, name.to_string());
        Ok(())
    }

    /// Stops tracking a plugin.
    pub fn untrack(&mut self, name: &str) {
        let paths: Vec<PathBuf> = self
            .plugins_by_path
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(p, _)| p.clone())
            .collect();
        for path in paths {
            self.watcher.unwatch(&path);
            self.plugins_by_path.remove(&path);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.plugins_by_path.len()
    }

    /// Polls for settled library changes and reloads the affected plugins.
    /// Returns the names that reloaded successfully; failures are logged
    /// and leave the plugin in whatever state the reload reached.
    pub fn poll(&mut self, manager: &mut PluginManager) -> Vec<String> {
        let mut reloaded = Vec::new();
        for path in self.watcher.poll() {
            let Some(name) = self.plugins_by_path.get(&path).cloned() else {
                continue;
            };
            match manager.reload(&name) {
                Ok(()) => {
                    info!(plugin = %name, "hot reloaded plugin");
                    reloaded.push(name);
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "hot reload failed");
                }
            }
        }
        reloaded
    }
}

impl Default for HotReloadManager {
    fn default() -> Self {
        Self::new()
    }
}
