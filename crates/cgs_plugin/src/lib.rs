//! Plugin architecture for the common game server framework.
//!
//! - [`plugin`] - The [`Plugin`] trait, lifecycle contract, and C ABI exports
//! - [`version`] - Versions and dependency constraints
//! - [`manager`] - Loading, dependency-ordered init, shutdown, unload
//! - [`event_bus`] - Typed publish/subscribe between host and plugins
//! - [`watcher`] - Debounced file modification polling
//! - [`hot_reload`] - Live reload of dynamic plugins with state carry-over

pub mod event_bus;
pub mod hot_reload;
pub mod manager;
pub mod plugin;
pub mod version;
pub mod watcher;

pub use event_bus::{EventBus, SubscriptionId};
pub use hot_reload::HotReloadManager;
pub use manager::{PluginManager, PluginState};
pub use plugin::{
    register_static_plugin, static_plugins, Plugin, PluginContext, PluginCreateFn,
    StaticPluginCtor, PLUGIN_API_VERSION,
};
pub use version::{PluginDependency, Version, VersionConstraint};
pub use watcher::FileWatcher;
