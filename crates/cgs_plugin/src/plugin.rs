//! The plugin trait, lifecycle contract, and static plugin registry.
//!
//! Lifecycle order is fixed: `on_load` when the plugin enters the manager,
//! `on_init` once dependencies are resolved, `on_update` every frame while
//! active, then `on_shutdown` and `on_unload` in reverse dependency order.
//!
//! Dynamic plugins export two C symbols: `cgs_plugin_api_version` returning
//! [`PLUGIN_API_VERSION`], and `cgs_create_plugin` returning a heap-allocated
//! trait object the host takes ownership of.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use cgs_foundation::{CgsResult, ConfigManager, GameMetrics, ServiceRegistry};

use crate::event_bus::EventBus;
use crate::version::{PluginDependency, Version};

/// ABI version of the host/plugin contract. Bumped on any breaking change
/// to [`Plugin`] or [`PluginContext`].
pub const PLUGIN_API_VERSION: u32 = 1;

/// Symbol name a dynamic plugin exports to report its ABI version.
pub const API_VERSION_SYMBOL: &[u8] = b"cgs_plugin_api_version";

/// Symbol name a dynamic plugin exports to construct its plugin object.
pub const CREATE_SYMBOL: &[u8] = b"cgs_create_plugin";

/// Signature of the `cgs_plugin_api_version` export.
pub type PluginApiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of the `cgs_create_plugin` export. Ownership of the returned
/// pointer transfers to the host.
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut (dyn Plugin + Send);

/// Shared host facilities handed to every plugin callback.
#[derive(Clone)]
pub struct PluginContext {
    pub services: Arc<ServiceRegistry>,
    pub events: Arc<EventBus>,
    pub config: Arc<ConfigManager>,
    pub metrics: Arc<GameMetrics>,
}

impl PluginContext {
    pub fn new() -> Self {
        Self {
            services: Arc::new(ServiceRegistry::new()),
            events: Arc::new(EventBus::new()),
            config: Arc::new(ConfigManager::new()),
            metrics: Arc::new(GameMetrics::new()),
        }
    }
}

impl Default for PluginContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A loadable unit of game logic.
pub trait Plugin: Send {
    /// Unique plugin name, used for dependency resolution.
    fn name(&self) -> &str;

    fn version(&self) -> Version;

    /// Plugins that must be initialized before this one.
    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// Called when the plugin enters the manager. Dependencies may not be
    /// loaded yet; defer cross-plugin work to [`Plugin::on_init`].
    fn on_load(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
        Ok(())
    }

    /// Called once all dependencies are initialized.
    fn on_init(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
        Ok(())
    }

    /// Called every frame while the plugin is active.
    fn on_update(&mut self, _ctx: &PluginContext, _dt: f32) {}

    /// Called before unload, in reverse dependency order.
    fn on_shutdown(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
        Ok(())
    }

    /// Last callback before the plugin object is dropped.
    fn on_unload(&mut self, _ctx: &PluginContext) {}

    /// Serializes state to survive a hot reload. `None` opts out.
    fn capture_state(&self) -> Option<Vec<u8>> {
        None
    }

    /// Restores state captured by the previous instance after a hot reload.
    fn restore_state(&mut self, _state: &[u8]) -> CgsResult<()> {
        Ok(())
    }
}

/// Constructor for a plugin compiled into the server binary.
pub type StaticPluginCtor = fn() -> Box<dyn Plugin>;

static STATIC_PLUGINS: Lazy<Mutex<Vec<StaticPluginCtor>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Registers a built-in plugin constructor. Typically called from crate
/// initialization before the manager loads registered plugins.
pub fn register_static_plugin(ctor: StaticPluginCtor) {
    STATIC_PLUGINS.lock().push(ctor);
}

/// Snapshot of all registered static plugin constructors.
pub fn static_plugins() -> Vec<StaticPluginCtor> {
    STATIC_PLUGINS.lock().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPlugin;

    impl Plugin for NullPlugin {
        fn name(&self) -> &str {
            "null"
        }
        fn version(&self) -> Version {
            Version::new(1, 0, 0)
        }
    }

    #[test]
    fn default_lifecycle_is_a_no_op() {
        let ctx = PluginContext::new();
        let mut plugin = NullPlugin;
        plugin.on_load(&ctx).unwrap();
        plugin.on_init(&ctx).unwrap();
        plugin.on_update(&ctx, 0.016);
        plugin.on_shutdown(&ctx).unwrap();
        plugin.on_unload(&ctx);
        assert!(plugin.capture_state().is_none());
    }

    #[test]
    fn static_registry_accumulates() {
        let before = static_plugins().len();
        register_static_plugin(|| Box::new(NullPlugin));
        assert_eq!(static_plugins().len(), before + 1);
    }
}
