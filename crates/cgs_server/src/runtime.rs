//! Server runtime: plugin host wiring, simulation driver, and graceful
//! shutdown.
//!
//! The runtime owns a [`PluginManager`] behind a mutex so the simulation
//! tick (which runs off the async runtime) and hot-reload polling can
//! share it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use cgs_foundation::{CgsResult, HealthStatus};
use cgs_plugin::{HotReloadManager, PluginContext, PluginManager, PluginState};

use crate::config::AppConfig;
use crate::signals;

static REGISTER_BUILTINS: std::sync::Once = std::sync::Once::new();

pub struct ServerRuntime {
    config: AppConfig,
    context: PluginContext,
    manager: Arc<Mutex<PluginManager>>,
    hot_reload: Arc<Mutex<HotReloadManager>>,
    ready: Arc<AtomicBool>,
}

impl ServerRuntime {
    /// Builds the runtime: loads and initializes all plugins and marks
    /// component health. `config_path` seeds the shared [`ConfigManager`]
    /// plugins read from.
    ///
    /// [`ConfigManager`]: cgs_foundation::ConfigManager
    pub fn new(config: AppConfig, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let context = PluginContext::new();
        if let Some(path) = config_path {
            if let Err(e) = context.config.load(path) {
                warn!(path = %path.display(), error = %e, "plugin config not loaded");
            }
        }

        REGISTER_BUILTINS.call_once(plugin_mmo::MmoPlugin::register);

        let mut manager = PluginManager::new(context.clone());
        let mut hot_reload = HotReloadManager::new();

        let builtin = manager.load_registered()?;
        info!(count = builtin, "loaded built-in plugins");

        if config.plugins.auto_load {
            for path in discover_plugin_libraries(&config.plugins.directory) {
                match manager.load_dynamic(&path) {
                    Ok(name) => {
                        if config.plugins.hot_reload {
                            if let Err(e) = hot_reload.track(&manager, &name) {
                                warn!(plugin = %name, error = %e, "hot reload tracking failed");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping plugin library");
                    }
                }
            }
        }

        manager.init_all()?;
        context
            .metrics
            .set_component_health("plugins", HealthStatus::Healthy);
        info!(plugins = manager.count(), "plugin system initialized");

        Ok(Self {
            config,
            context,
            manager: Arc::new(Mutex::new(manager)),
            hot_reload: Arc::new(Mutex::new(hot_reload)),
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.manager.lock().names()
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.manager.lock().state(name)
    }

    /// Runs one simulation step directly. The tick driver does the same
    /// thing on its own thread.
    pub fn tick_once(&self, dt: f32) {
        self.manager.lock().update_all(dt);
        self.context.events.flush();
        self.context
            .metrics
            .increment_counter("server_ticks_total", 1);
    }

    /// Runs until a shutdown signal arrives, then tears everything down
    /// in reverse order.
    pub async fn run(self) -> anyhow::Result<()> {
        #[cfg(feature = "services")]
        let health = self.start_health().await?;

        let driver = self.start_tick_driver()?;
        self.ready.store(true, Ordering::SeqCst);
        info!(
            name = %self.config.server.name,
            hz = self.config.server.tick_rate_hz,
            "server running"
        );

        signals::shutdown_signal().await?;

        info!("shutting down");
        self.ready.store(false, Ordering::SeqCst);
        stop_tick_driver(driver).await;
        self.manager.lock().shutdown_all();

        #[cfg(feature = "services")]
        if let Some(server) = health {
            server.shutdown().await;
        }

        info!("shutdown complete");
        Ok(())
    }

    #[cfg(feature = "services")]
    async fn start_health(&self) -> anyhow::Result<Option<cgs_services::HealthServer>> {
        if !self.config.health.enabled {
            return Ok(None);
        }
        let addr = self.config.health.bind_address.parse()?;
        let server = cgs_services::HealthServer::bind(
            addr,
            self.context.metrics.clone(),
            self.ready.clone(),
        )
        .await?;
        info!(addr = %server.local_addr(), "health endpoint listening");
        Ok(Some(server))
    }

    fn make_tick_fn(&self) -> impl FnMut(u64, f32) + Send + 'static {
        let manager = self.manager.clone();
        let hot_reload = self.hot_reload.clone();
        let events = self.context.events.clone();
        let metrics = self.context.metrics.clone();
        let hot_reload_enabled = self.config.plugins.hot_reload;
        // Poll the library watcher about once per second.
        let poll_every = u64::from(self.config.server.tick_rate_hz.max(1));

        move |tick, dt| {
            let mut manager = manager.lock();
            manager.update_all(dt);
            events.flush();
            metrics.increment_counter("server_ticks_total", 1);
            if hot_reload_enabled && tick % poll_every == 0 {
                for name in hot_reload.lock().poll(&mut manager) {
                    info!(plugin = %name, "plugin hot reloaded");
                }
            }
        }
    }

    #[cfg(feature = "services")]
    fn start_tick_driver(&self) -> CgsResult<TickDriver> {
        cgs_services::GameLoop::start(
            cgs_services::GameLoopConfig {
                tick_rate_hz: self.config.server.tick_rate_hz,
            },
            self.make_tick_fn(),
        )
    }

    #[cfg(not(feature = "services"))]
    fn start_tick_driver(&self) -> CgsResult<TickDriver> {
        use std::time::Duration;

        let mut tick_fn = self.make_tick_fn();
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.server.tick_rate_hz));
        let dt = period.as_secs_f32();
        let (stop, mut stopped) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut tick = 0u64;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tick_fn(tick, dt);
                        tick += 1;
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        Ok(TickDriver { stop, handle })
    }
}

#[cfg(feature = "services")]
type TickDriver = cgs_services::GameLoop;

#[cfg(feature = "services")]
async fn stop_tick_driver(mut driver: TickDriver) {
    driver.stop();
}

#[cfg(not(feature = "services"))]
struct TickDriver {
    stop: tokio::sync::watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

#[cfg(not(feature = "services"))]
async fn stop_tick_driver(driver: TickDriver) {
    let _ = driver.stop.send(true);
    let _ = driver.handle.await;
}

/// Shared library files in the plugin directory, in a stable order. A
/// missing directory yields an empty list.
fn discover_plugin_libraries(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_lib = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("so" | "dylib" | "dll")
        );
        if is_lib {
            found.push(path);
        }
    }
    found.sort();
    found
}
