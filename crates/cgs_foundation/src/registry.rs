//! Type-keyed registry for sharing service instances across subsystems.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CgsError, CgsResult};

/// Registry mapping a service type to its shared instance.
///
/// One instance per type. Services are stored as `Arc<T>` so callers can
/// hold them past the registry lock.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service instance.
    ///
    /// # Errors
    /// Returns [`CgsError::AlreadyExists`] when a service of this type is
    /// already registered.
    pub fn register<T: Any + Send + Sync>(&self, service: Arc<T>) -> CgsResult<()> {
        let mut services = self.services.write();
        if services.contains_key(&TypeId::of::<T>()) {
            return Err(CgsError::AlreadyExists(type_name::<T>().to_string()));
        }
        services.insert(TypeId::of::<T>(), service);
        Ok(())
    }

    /// Looks up a registered service by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    /// True when a service of type `T` is registered.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns the service of type `T`, if registered.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|s| s.downcast::<T>().ok())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
