//! Plugin lifecycle management and dependency resolution.
//!
//! The manager owns every plugin instance, static or dynamically loaded,
//! and drives them through the lifecycle state machine:
//!
//! `Unloaded -> Loaded -> Initialized -> Active -> ShuttingDown -> Unloaded`
//!
//! A failed callback parks the plugin in `Error`. Initialization order is a
//! topological sort of declared dependencies; shutdown runs in reverse.

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{info, warn};

use cgs_foundation::error::{CgsError, CgsResult};

use crate::plugin::{
    static_plugins, Plugin, PluginApiVersionFn, PluginContext, PluginCreateFn,
    API_VERSION_SYMBOL, CREATE_SYMBOL, PLUGIN_API_VERSION,
};

/// Lifecycle state of a managed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unloaded,
    Loaded,
    Initialized,
    Active,
    ShuttingDown,
    Error,
}

struct PluginEntry {
    // Field order is load-bearing: the plugin object must drop before the
    // library that holds its code.
    plugin: Box<dyn Plugin>,
    state: PluginState,
    path: Option<PathBuf>,
    library: Option<Library>,
}

/// Owns all plugins and drives their lifecycle.
pub struct PluginManager {
    context: PluginContext,
    entries: Vec<PluginEntry>,
    init_order: Vec<String>,
}

impl PluginManager {
    pub fn new(context: PluginContext) -> Self {
        Self {
            context,
            entries: Vec::new(),
            init_order: Vec::new(),
        }
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Adds a plugin instance compiled into the host binary.
    ///
    /// # Errors
    /// Returns [`CgsError::AlreadyExists`] on duplicate names, or any error
    /// from the plugin's `on_load`.
    pub fn load_static(&mut self, mut plugin: Box<dyn Plugin>) -> CgsResult<()> {
        let name = plugin.name().to_string();
        if self.find(&name).is_some() {
            return Err(CgsError::AlreadyExists(name));
        }
        plugin.on_load(&self.context)?;
        info!(plugin = %name, version = %plugin.version(), "loaded static plugin");
        self.entries.push(PluginEntry {
            plugin,
            state: PluginState::Loaded,
            path: None,
            library: None,
        });
        Ok(())
    }

    /// Instantiates every constructor in the static plugin registry.
    /// Returns how many plugins were added.
    pub fn load_registered(&mut self) -> CgsResult<usize> {
        let ctors = static_plugins();
        let mut added = 0;
        for ctor in ctors {
            self.load_static(ctor())?;
            added += 1;
        }
        Ok(added)
    }

    /// Loads a plugin from a shared library.
    ///
    /// The library must export `cgs_plugin_api_version` matching
    /// [`PLUGIN_API_VERSION`] and `cgs_create_plugin` returning a non-null
    /// plugin object. Returns the plugin's name.
    ///
    /// # Errors
    /// [`CgsError::PluginLoadFailed`] when the library or symbols cannot be
    /// resolved, [`CgsError::ApiVersionMismatch`] on ABI skew, and
    /// [`CgsError::AlreadyExists`] on duplicate names.
    pub fn load_dynamic(&mut self, path: &Path) -> CgsResult<String> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            CgsError::PluginLoadFailed(format!("{}: {e}", path.display()))
        })?;

        let api_version = unsafe {
            let symbol: libloading::Symbol<PluginApiVersionFn> =
                library.get(API_VERSION_SYMBOL).map_err(|e| {
                    CgsError::PluginLoadFailed(format!(
                        "{}: missing api version symbol: {e}",
                        path.display()
                    ))
                })?;
            symbol()
        };
        if api_version != PLUGIN_API_VERSION {
            return Err(CgsError::ApiVersionMismatch(format!(
                "{}: plugin API v{api_version}, host API v{PLUGIN_API_VERSION}",
                path.display()
            )));
        }

        let raw = unsafe {
            let symbol: libloading::Symbol<PluginCreateFn> =
                library.get(CREATE_SYMBOL).map_err(|e| {
                    CgsError::PluginLoadFailed(format!(
                        "{}: missing create symbol: {e}",
                        path.display()
                    ))
                })?;
            symbol()
        };
        if raw.is_null() {
            return Err(CgsError::PluginLoadFailed(format!(
                "{}: create symbol returned null",
                path.display()
            )));
        }
        let mut plugin: Box<dyn Plugin> = unsafe { Box::from_raw(raw) };

        let name = plugin.name().to_string();
        if self.find(&name).is_some() {
            return Err(CgsError::AlreadyExists(name));
        }
        plugin.on_load(&self.context)?;
        info!(plugin = %name, version = %plugin.version(), path = %path.display(), "loaded dynamic plugin");
        self.entries.push(PluginEntry {
            plugin,
            state: PluginState::Loaded,
            path: Some(path.to_path_buf()),
            library: Some(library),
        });
        Ok(name)
    }

    /// Resolves dependencies and initializes all loaded plugins in order.
    ///
    /// # Errors
    /// Returns [`CgsError::DependencyError`] for missing or unsatisfied
    /// dependencies or cycles, or the first `on_init` failure (the failing
    /// plugin is parked in `Error`).
    pub fn init_all(&mut self) -> CgsResult<()> {
        self.init_order = self.resolve_order()?;
        for name in self.init_order.clone() {
            let Some(index) = self.find(&name) else {
                continue;
            };
            if self.entries[index].state != PluginState::Loaded {
                continue;
            }
            let context = self.context.clone();
            if let Err(e) = self.entries[index].plugin.on_init(&context) {
                self.entries[index].state = PluginState::Error;
                return Err(e);
            }
            self.entries[index].state = PluginState::Initialized;
        }
        Ok(())
    }

    /// Ticks every active plugin. Freshly initialized plugins become
    /// active on their first update.
    pub fn update_all(&mut self, dt: f32) {
        let context = self.context.clone();
        for name in self.init_order.clone() {
            let Some(index) = self.find(&name) else {
                continue;
            };
            let entry = &mut self.entries[index];
            if entry.state == PluginState::Initialized {
                entry.state = PluginState::Active;
            }
            if entry.state == PluginState::Active {
                entry.plugin.on_update(&context, dt);
            }
        }
    }

    /// Shuts down all plugins in reverse initialization order. Shutdown
    /// failures are logged and the plugin parked in `Error`; the sweep
    /// continues regardless.
    pub fn shutdown_all(&mut self) {
        let order: Vec<String> = if self.init_order.is_empty() {
            self.entries.iter().map(|e| e.plugin.name().to_string()).collect()
        } else {
            self.init_order.clone()
        };
        let context = self.context.clone();
        for name in order.iter().rev() {
            if let Some(index) = self.find(name) {
                shutdown_entry(&mut self.entries[index], &context);
            }
        }
    }

    /// Shuts down and removes a single plugin.
    ///
    /// # Errors
    /// Returns [`CgsError::PluginNotFound`] for unknown names and
    /// [`CgsError::DependencyError`] when another loaded plugin still
    /// depends on it.
    pub fn unload(&mut self, name: &str) -> CgsResult<()> {
        let index = self
            .find(name)
            .ok_or_else(|| CgsError::PluginNotFound(name.to_string()))?;

        for entry in &self.entries {
            if entry.plugin.name() == name {
                continue;
            }
            if entry.plugin.dependencies().iter().any(|d| d.name == name) {
                return Err(CgsError::DependencyError(format!(
                    "cannot unload '{name}': '{}' depends on it",
                    entry.plugin.name()
                )));
            }
        }

        let context = self.context.clone();
        shutdown_entry(&mut self.entries[index], &context);
        self.entries.remove(index);
        self.init_order.retain(|n| n != name);
        Ok(())
    }

    /// Reloads a dynamic plugin from its library on disk, carrying state
    /// across via `capture_state` / `restore_state`.
    ///
    /// # Errors
    /// Returns [`CgsError::PluginNotFound`] for unknown names,
    /// [`CgsError::InvalidArgument`] for static plugins, and any load or
    /// init error from the fresh instance.
    pub fn reload(&mut self, name: &str) -> CgsResult<()> {
        let index = self
            .find(name)
            .ok_or_else(|| CgsError::PluginNotFound(name.to_string()))?;
        let path = self.entries[index]
            .path
            .clone()
            .ok_or_else(|| {
                CgsError::InvalidArgument(format!("plugin '{name}' is static, cannot reload"))
            })?;

        let state = self.entries[index].plugin.capture_state();
        let context = self.context.clone();
        shutdown_entry(&mut self.entries[index], &context);
        self.entries.remove(index);
        self.init_order.retain(|n| n != name);

        let new_name = self.load_dynamic(&path)?;
        if new_name != name {
            warn!(old = %name, new = %new_name, "plugin changed name across reload");
        }
        let new_index = self
            .find(&new_name)
            .ok_or_else(|| CgsError::PluginNotFound(new_name.clone()))?;
        if let Some(bytes) = state {
            self.entries[new_index].plugin.restore_state(&bytes)?;
        }
        self.entries[new_index].plugin.on_init(&context)?;
        self.entries[new_index].state = PluginState::Initialized;
        self.init_order.push(new_name);
        Ok(())
    }

    /// Current lifecycle state of a plugin.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.find(name).map(|i| self.entries[i].state)
    }

    /// Filesystem path of a dynamic plugin.
    pub fn library_path(&self, name: &str) -> Option<PathBuf> {
        self.find(name).and_then(|i| self.entries[i].path.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.plugin.name() == name)
    }

    /// Kahn's algorithm over declared dependencies, seeded in load order.
    fn resolve_order(&self) -> CgsResult<Vec<String>> {
        let n = self.entries.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, entry) in self.entries.iter().enumerate() {
            for dep in entry.plugin.dependencies() {
                let Some(dep_index) = self.find(&dep.name) else {
                    return Err(CgsError::DependencyError(format!(
                        "plugin '{}' requires '{}', which is not loaded",
                        entry.plugin.name(),
                        dep.name
                    )));
                };
                let provided = self.entries[dep_index].plugin.version();
                if !dep.constraint.matches(provided) {
                    return Err(CgsError::DependencyError(format!(
                        "plugin '{}' requires '{}' {}, found {}",
                        entry.plugin.name(),
                        dep.name,
                        dep.constraint,
                        provided
                    )));
                }
                indegree[i] += 1;
                dependents[dep_index].push(i);
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut head = 0;
        while head < queue.len() {
            let i = queue[head];
            head += 1;
            order.push(self.entries[i].plugin.name().to_string());
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push(d);
                }
            }
        }
        if order.len() != n {
            return Err(CgsError::DependencyError(
                "dependency cycle among plugins".to_string(),
            ));
        }
        Ok(order)
    }
}

fn shutdown_entry(entry: &mut PluginEntry, context: &PluginContext) {
    if matches!(entry.state, PluginState::Initialized | PluginState::Active) {
        entry.state = PluginState::ShuttingDown;
        if let Err(e) = entry.plugin.on_shutdown(context) {
            warn!(plugin = %entry.plugin.name(), error = %e, "plugin shutdown failed");
            entry.state = PluginState::Error;
            entry.plugin.on_unload(context);
            return;
        }
    }
    entry.plugin.on_unload(context);
    entry.state = PluginState::Unloaded;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{PluginDependency, Version, VersionConstraint};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct TestPlugin {
        name: &'static str,
        version: Version,
        deps: Vec<PluginDependency>,
        log: Log,
        fail_init: bool,
    }

    impl TestPlugin {
        fn boxed(name: &'static str, deps: Vec<PluginDependency>, log: Log) -> Box<dyn Plugin> {
            Box::new(TestPlugin {
                name,
                version: Version::new(1, 0, 0),
                deps,
                log,
                fail_init: false,
            })
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> Version {
            self.version
        }
        fn dependencies(&self) -> Vec<PluginDependency> {
            self.deps.clone()
        }
        fn on_load(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
            self.log.lock().push(format!("load:{}", self.name));
            Ok(())
        }
        fn on_init(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
            if self.fail_init {
                return Err(CgsError::SystemError("init failed".into()));
            }
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }
        fn on_update(&mut self, _ctx: &PluginContext, _dt: f32) {
            self.log.lock().push(format!("update:{}", self.name));
        }
        fn on_shutdown(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            Ok(())
        }
        fn on_unload(&mut self, _ctx: &PluginContext) {
            self.log.lock().push(format!("unload:{}", self.name));
        }
    }

    fn dep(name: &str) -> PluginDependency {
        PluginDependency::new(name, VersionConstraint::any())
    }

    #[test]
    fn lifecycle_in_dependency_order() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        // Loaded out of order on purpose.
        manager
            .load_static(TestPlugin::boxed("combat", vec![dep("physics")], log.clone()))
            .unwrap();
        manager
            .load_static(TestPlugin::boxed("physics", vec![], log.clone()))
            .unwrap();

        manager.init_all().unwrap();
        assert_eq!(manager.state("physics"), Some(PluginState::Initialized));

        manager.update_all(0.016);
        assert_eq!(manager.state("combat"), Some(PluginState::Active));

        manager.shutdown_all();
        assert_eq!(manager.state("combat"), Some(PluginState::Unloaded));

        let events = log.lock().clone();
        assert_eq!(
            events,
            vec![
                "load:combat",
                "load:physics",
                "init:physics",
                "init:combat",
                "update:physics",
                "update:combat",
                "shutdown:combat",
                "unload:combat",
                "shutdown:physics",
                "unload:physics",
            ]
        );
    }

    #[test]
    fn missing_dependency_fails_init() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("combat", vec![dep("physics")], log))
            .unwrap();
        assert!(matches!(
            manager.init_all(),
            Err(CgsError::DependencyError(_))
        ));
    }

    #[test]
    fn unsatisfied_constraint_fails_init() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("physics", vec![], log.clone()))
            .unwrap();
        manager
            .load_static(Box::new(TestPlugin {
                name: "combat",
                version: Version::new(1, 0, 0),
                deps: vec![PluginDependency::new(
                    "physics",
                    VersionConstraint::parse(">=2.0").unwrap(),
                )],
                log,
                fail_init: false,
            }))
            .unwrap();
        assert!(matches!(
            manager.init_all(),
            Err(CgsError::DependencyError(_))
        ));
    }

    #[test]
    fn dependency_cycle_is_detected() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("a", vec![dep("b")], log.clone()))
            .unwrap();
        manager
            .load_static(TestPlugin::boxed("b", vec![dep("a")], log))
            .unwrap();
        assert!(matches!(
            manager.init_all(),
            Err(CgsError::DependencyError(_))
        ));
    }

    #[test]
    fn failed_init_parks_plugin_in_error() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(Box::new(TestPlugin {
                name: "broken",
                version: Version::new(1, 0, 0),
                deps: vec![],
                log,
                fail_init: true,
            }))
            .unwrap();
        assert!(manager.init_all().is_err());
        assert_eq!(manager.state("broken"), Some(PluginState::Error));
    }

    #[test]
    fn duplicate_name_rejected() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("physics", vec![], log.clone()))
            .unwrap();
        assert!(matches!(
            manager.load_static(TestPlugin::boxed("physics", vec![], log)),
            Err(CgsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn unload_refused_while_depended_upon() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("physics", vec![], log.clone()))
            .unwrap();
        manager
            .load_static(TestPlugin::boxed("combat", vec![dep("physics")], log))
            .unwrap();
        manager.init_all().unwrap();

        assert!(matches!(
            manager.unload("physics"),
            Err(CgsError::DependencyError(_))
        ));
        manager.unload("combat").unwrap();
        manager.unload("physics").unwrap();
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn reload_rejected_for_static_plugins() {
        let log: Log = Arc::default();
        let mut manager = PluginManager::new(PluginContext::new());
        manager
            .load_static(TestPlugin::boxed("physics", vec![], log))
            .unwrap();
        manager.init_all().unwrap();
        assert!(matches!(
            manager.reload("physics"),
            Err(CgsError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.reload("ghost"),
            Err(CgsError::PluginNotFound(_))
        ));
    }

    #[test]
    fn missing_library_fails_to_load() {
        let mut manager = PluginManager::new(PluginContext::new());
        let err = manager
            .load_dynamic(Path::new("/nonexistent/libplugin.so"))
            .unwrap_err();
        assert!(matches!(err, CgsError::PluginLoadFailed(_)));
    }
}
