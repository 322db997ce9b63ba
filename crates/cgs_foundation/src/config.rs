//! YAML-based configuration management with typed access and watch support.
//!
//! [`ConfigManager`] loads a YAML file and flattens the mapping tree into
//! dotted keys (`"server.port"`), which sidesteps the aliasing pitfalls of
//! holding references into a parsed document. Values are converted on
//! access via serde, so any `Deserialize` type works.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;

use crate::error::{CgsError, CgsResult};

/// Callback invoked when a watched configuration key changes via [`ConfigManager::set`].
pub type ConfigWatchCallback = Box<dyn Fn(&str) + Send + Sync>;

/// YAML configuration manager providing typed access to config values.
///
/// Supports loading from file, dotted-key access (e.g. `"server.port"`),
/// setting values at runtime, and registering callbacks for change
/// notification.
#[derive(Default)]
pub struct ConfigManager {
    entries: Mutex<HashMap<String, Value>>,
    watchers: Mutex<HashMap<String, Vec<ConfigWatchCallback>>>,
}

impl ConfigManager {
    /// Creates an empty configuration manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file, replacing any current entries.
    ///
    /// # Errors
    /// Returns [`CgsError::ConfigLoadFailed`] when the file cannot be read
    /// or is not valid YAML.
    pub fn load(&self, path: &Path) -> CgsResult<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CgsError::ConfigLoadFailed(format!("failed to open {}: {e}", path.display()))
        })?;
        let root: Value = serde_yaml::from_str(&content)
            .map_err(|e| CgsError::ConfigLoadFailed(format!("YAML parse error: {e}")))?;

        let mut flattened = HashMap::new();
        flatten("", &root, &mut flattened);

        *self.entries.lock() = flattened;
        Ok(())
    }

    /// Retrieves a typed value by dotted key (e.g. `"server.port"`).
    ///
    /// # Errors
    /// Returns [`CgsError::ConfigKeyNotFound`] for unknown keys and
    /// [`CgsError::ConfigTypeMismatch`] when the stored value cannot
    /// convert to `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CgsResult<T> {
        let value = self
            .entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CgsError::ConfigKeyNotFound(key.to_string()))?;
        serde_yaml::from_value(value).map_err(|_| CgsError::ConfigTypeMismatch(key.to_string()))
    }

    /// Sets a value by dotted key and notifies any watchers for that key.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_yaml::to_value(value) {
            Ok(v) => v,
            Err(_) => return, // non-serializable values cannot be stored
        };
        self.entries.lock().insert(key.to_string(), value);
        self.notify_watchers(key);
    }

    /// Registers a callback that fires when `key` changes via [`ConfigManager::set`].
    pub fn watch(&self, key: &str, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.watchers
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    /// Checks whether a dotted key exists in the current configuration.
    pub fn has_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Returns the number of flattened leaf entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no configuration has been loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    // Callbacks run with the watcher lock held but the entry lock released,
    // so a callback may read other keys without deadlocking.
    fn notify_watchers(&self, key: &str) {
        let watchers = self.watchers.lock();
        if let Some(callbacks) = watchers.get(key) {
            for cb in callbacks {
                cb(key);
            }
        }
    }
}

/// Flattens a YAML tree into dotted-key leaf entries.
fn flatten(prefix: &str, node: &Value, out: &mut HashMap<String, Value>) {
    match node {
        Value::Mapping(map) => {
            for (k, v) in map {
                let child = match k {
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                let full = if prefix.is_empty() {
                    child
                } else {
                    format!("{prefix}.{child}")
                };
                flatten(&full, v, out);
            }
        }
        // Leaf node (scalar, sequence, null) is stored under its dotted key.
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_and_get_typed_values() {
        let file = write_config(
            "server:\n  port: 8080\n  name: gateway\nlimits:\n  max_sessions: 5000\n",
        );
        let config = ConfigManager::new();
        config.load(file.path()).unwrap();

        assert_eq!(config.get::<u16>("server.port").unwrap(), 8080);
        assert_eq!(config.get::<String>("server.name").unwrap(), "gateway");
        assert_eq!(config.get::<usize>("limits.max_sessions").unwrap(), 5000);
        assert!(config.has_key("server.port"));
        assert!(!config.has_key("server.missing"));
    }

    #[test]
    fn sequences_are_leaves() {
        let file = write_config("plugins:\n  whitelist: [alpha, beta]\n");
        let config = ConfigManager::new();
        config.load(file.path()).unwrap();

        let list: Vec<String> = config.get("plugins.whitelist").unwrap();
        assert_eq!(list, vec!["alpha", "beta"]);
    }

    #[test]
    fn missing_key_and_type_mismatch() {
        let file = write_config("server:\n  port: not-a-number\n");
        let config = ConfigManager::new();
        config.load(file.path()).unwrap();

        assert!(matches!(
            config.get::<u16>("server.host"),
            Err(CgsError::ConfigKeyNotFound(_))
        ));
        assert!(matches!(
            config.get::<u16>("server.port"),
            Err(CgsError::ConfigTypeMismatch(_))
        ));
    }

    #[test]
    fn load_failure_for_missing_file() {
        let config = ConfigManager::new();
        let err = config.load(Path::new("/nonexistent/cgs.yaml")).unwrap_err();
        assert!(matches!(err, CgsError::ConfigLoadFailed(_)));
    }

    #[test]
    fn load_failure_for_bad_yaml() {
        let file = write_config("server: [unclosed\n");
        let config = ConfigManager::new();
        assert!(matches!(
            config.load(file.path()),
            Err(CgsError::ConfigLoadFailed(_))
        ));
    }

    #[test]
    fn set_notifies_watchers() {
        let config = ConfigManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        config.watch("server.port", move |key| {
            assert_eq!(key, "server.port");
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        config.set("server.port", &9090u16);
        config.set("server.host", &"localhost"); // different key, no callback

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(config.get::<u16>("server.port").unwrap(), 9090);
    }

    #[test]
    fn reload_replaces_entries() {
        let first = write_config("a: 1\nb: 2\n");
        let second = write_config("a: 10\n");
        let config = ConfigManager::new();

        config.load(first.path()).unwrap();
        assert_eq!(config.len(), 2);

        config.load(second.path()).unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config.get::<i64>("a").unwrap(), 10);
        assert!(!config.has_key("b"));
    }
}
