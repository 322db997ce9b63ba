//! Entity lifetimes and the component world.
//!
//! [`EntityManager`] owns the slot table: creation pulls from a FIFO free
//! list so indices are not reused immediately, and each recycle bumps the
//! slot version (wrapping at 256) to invalidate stale handles.
//!
//! [`World`] ties the entity table to per-type component storages. All
//! operations take `&self`; storages sit behind `RwLock` so systems running
//! in parallel can read disjoint component sets without coordination.

use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use cgs_foundation::error::{CgsError, CgsResult};

use crate::entity::{Entity, MAX_ENTITY_INDEX};
use crate::storage::{Component, ComponentStorage};

#[derive(Default)]
struct EntityTable {
    versions: Vec<u8>,
    alive: Vec<bool>,
    free: VecDeque<u32>,
    alive_count: usize,
}

/// Allocates and recycles entity handles.
#[derive(Default)]
pub struct EntityManager {
    table: Mutex<EntityTable>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new entity, recycling the oldest freed slot if any.
    ///
    /// # Errors
    /// Returns [`CgsError::SystemError`] when the 24-bit index space is
    /// exhausted.
    pub fn create(&self) -> CgsResult<Entity> {
        let mut table = self.table.lock();
        let index = match table.free.pop_front() {
            Some(index) => index,
            None => {
                let index = table.versions.len() as u32;
                if index > MAX_ENTITY_INDEX {
                    return Err(CgsError::SystemError(
                        "entity index space exhausted".to_string(),
                    ));
                }
                table.versions.push(0);
                table.alive.push(false);
                index
            }
        };
        table.alive[index as usize] = true;
        table.alive_count += 1;
        Ok(Entity::new(index, table.versions[index as usize]))
    }

    /// Destroys an entity, invalidating its handle.
    ///
    /// # Errors
    /// Returns [`CgsError::EntityNotFound`] for stale or unknown handles.
    pub fn destroy(&self, entity: Entity) -> CgsResult<()> {
        let mut table = self.table.lock();
        let index = entity.index() as usize;
        if !table_is_alive(&table, entity) {
            return Err(CgsError::EntityNotFound(entity.to_string()));
        }
        table.alive[index] = false;
        table.versions[index] = table.versions[index].wrapping_add(1);
        table.free.push_back(entity.index());
        table.alive_count -= 1;
        Ok(())
    }

    /// True when the handle refers to a currently live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        table_is_alive(&self.table.lock(), entity)
    }

    /// Number of live entities.
    pub fn alive_count(&self) -> usize {
        self.table.lock().alive_count
    }

    /// Number of entity slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.table.lock().versions.len()
    }
}

fn table_is_alive(table: &EntityTable, entity: Entity) -> bool {
    if !entity.is_valid() {
        return false;
    }
    let index = entity.index() as usize;
    index < table.versions.len()
        && table.alive[index]
        && table.versions[index] == entity.version()
}

/// Erased view of a storage, used to strip components on despawn.
trait ErasedStorage: Send + Sync {
    fn remove_entity(&self, entity: Entity);
}

impl<T: Component> ErasedStorage for Arc<RwLock<ComponentStorage<T>>> {
    fn remove_entity(&self, entity: Entity) {
        self.write().remove(entity);
    }
}

/// The component world: entity table plus one storage per component type.
#[derive(Default)]
pub struct World {
    entities: EntityManager,
    storages: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    erased: RwLock<Vec<Box<dyn ErasedStorage>>>,
    deferred: Mutex<Vec<Entity>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type. Idempotent.
    pub fn register_component<T: Component>(&self) {
        let mut storages = self.storages.write();
        if storages.contains_key(&TypeId::of::<T>()) {
            return;
        }
        let storage: Arc<RwLock<ComponentStorage<T>>> = Arc::default();
        storages.insert(TypeId::of::<T>(), Arc::new(storage.clone()));
        self.erased.write().push(Box::new(storage));
    }

    /// Shared handle to the storage for `T`.
    ///
    /// # Errors
    /// Returns [`CgsError::ComponentNotFound`] when `T` was never registered.
    pub fn storage<T: Component>(&self) -> CgsResult<Arc<RwLock<ComponentStorage<T>>>> {
        self.storages
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Arc<RwLock<ComponentStorage<T>>>>())
            .cloned()
            .ok_or_else(|| CgsError::ComponentNotFound(type_name::<T>().to_string()))
    }

    /// Creates a new entity.
    pub fn spawn(&self) -> CgsResult<Entity> {
        self.entities.create()
    }

    /// Destroys an entity and removes all of its components.
    pub fn despawn(&self, entity: Entity) -> CgsResult<()> {
        self.entities.destroy(entity)?;
        for storage in self.erased.read().iter() {
            storage.remove_entity(entity);
        }
        Ok(())
    }

    /// Queues an entity for destruction at the next [`World::flush_deferred`].
    /// Safe to call from inside query closures, where an immediate despawn
    /// would deadlock on the storage lock.
    pub fn despawn_deferred(&self, entity: Entity) {
        self.deferred.lock().push(entity);
    }

    /// Destroys all queued entities, skipping any that died in the
    /// meantime. Returns how many were destroyed.
    pub fn flush_deferred(&self) -> usize {
        let queued: Vec<Entity> = std::mem::take(&mut *self.deferred.lock());
        let mut destroyed = 0;
        for entity in queued {
            if self.despawn(entity).is_ok() {
                destroyed += 1;
            }
        }
        destroyed
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn alive_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Entity slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.entities.capacity()
    }

    /// Attaches a component to a live entity.
    ///
    /// # Errors
    /// [`CgsError::EntityNotFound`] for dead handles,
    /// [`CgsError::ComponentNotFound`] for unregistered types, and
    /// [`CgsError::AlreadyExists`] when the entity already has a `T`; use
    /// [`World::replace`] to overwrite.
    pub fn insert<T: Component>(&self, entity: Entity, value: T) -> CgsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(CgsError::EntityNotFound(entity.to_string()));
        }
        self.storage::<T>()?.write().insert(entity, value)
    }

    /// Inserts or overwrites a component, returning any previous value.
    ///
    /// # Errors
    /// Returns [`CgsError::EntityNotFound`] for dead handles and
    /// [`CgsError::ComponentNotFound`] for unregistered types.
    pub fn replace<T: Component>(&self, entity: Entity, value: T) -> CgsResult<Option<T>> {
        if !self.entities.is_alive(entity) {
            return Err(CgsError::EntityNotFound(entity.to_string()));
        }
        Ok(self.storage::<T>()?.write().replace(entity, value))
    }

    /// Detaches a component, returning it if present.
    pub fn remove<T: Component>(&self, entity: Entity) -> CgsResult<Option<T>> {
        Ok(self.storage::<T>()?.write().remove(entity))
    }

    /// True when the entity currently has a `T` component.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.storage::<T>()
            .map(|s| s.read().contains(entity))
            .unwrap_or(false)
    }

    /// Copies out the component value, if present.
    pub fn get_cloned<T: Component + Clone>(&self, entity: Entity) -> Option<T> {
        self.storage::<T>()
            .ok()
            .and_then(|s| s.read().get(entity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    #[test]
    fn create_destroy_recycles_with_version_bump() {
        let manager = EntityManager::new();
        let a = manager.create().unwrap();
        assert!(manager.is_alive(a));
        assert_eq!(manager.alive_count(), 1);

        manager.destroy(a).unwrap();
        assert!(!manager.is_alive(a));
        assert_eq!(manager.alive_count(), 0);

        let b = manager.create().unwrap();
        assert_eq!(b.index(), a.index());
        assert_eq!(b.version(), a.version().wrapping_add(1));
        assert!(manager.is_alive(b));
        assert!(!manager.is_alive(a));
    }

    #[test]
    fn free_list_is_fifo() {
        let manager = EntityManager::new();
        let first = manager.create().unwrap();
        let second = manager.create().unwrap();
        manager.destroy(first).unwrap();
        manager.destroy(second).unwrap();

        let recycled = manager.create().unwrap();
        assert_eq!(recycled.index(), first.index());
    }

    #[test]
    fn double_destroy_is_an_error() {
        let manager = EntityManager::new();
        let e = manager.create().unwrap();
        manager.destroy(e).unwrap();
        assert!(matches!(
            manager.destroy(e),
            Err(CgsError::EntityNotFound(_))
        ));
    }

    #[test]
    fn version_wraps_after_256_recycles() {
        let manager = EntityManager::new();
        let mut e = manager.create().unwrap();
        let index = e.index();
        for _ in 0..256 {
            manager.destroy(e).unwrap();
            e = manager.create().unwrap();
            assert_eq!(e.index(), index);
        }
        assert_eq!(e.version(), 0);
        assert!(manager.is_alive(e));
    }

    #[test]
    fn world_insert_and_get() {
        let world = World::new();
        world.register_component::<Position>();

        let e = world.spawn().unwrap();
        world.insert(e, Position { x: 1.0, y: 2.0 }).unwrap();
        assert!(world.has::<Position>(e));
        assert_eq!(
            world.get_cloned::<Position>(e),
            Some(Position { x: 1.0, y: 2.0 })
        );
    }

    #[test]
    fn duplicate_insert_requires_replace() {
        let world = World::new();
        world.register_component::<Position>();
        let e = world.spawn().unwrap();
        world.insert(e, Position { x: 1.0, y: 1.0 }).unwrap();

        assert!(matches!(
            world.insert(e, Position { x: 2.0, y: 2.0 }),
            Err(CgsError::AlreadyExists(_))
        ));
        assert_eq!(
            world.replace(e, Position { x: 2.0, y: 2.0 }).unwrap(),
            Some(Position { x: 1.0, y: 1.0 })
        );
        assert_eq!(
            world.get_cloned::<Position>(e),
            Some(Position { x: 2.0, y: 2.0 })
        );
    }

    #[test]
    fn despawn_strips_components() {
        let world = World::new();
        world.register_component::<Position>();
        world.register_component::<Label>();

        let e = world.spawn().unwrap();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.insert(e, Label("npc".into())).unwrap();
        world.despawn(e).unwrap();

        assert!(!world.is_alive(e));
        assert_eq!(world.storage::<Position>().unwrap().read().len(), 0);
        assert_eq!(world.storage::<Label>().unwrap().read().len(), 0);
    }

    #[test]
    fn deferred_despawn_skips_already_dead() {
        let world = World::new();
        world.register_component::<Position>();
        let a = world.spawn().unwrap();
        let b = world.spawn().unwrap();
        world.insert(a, Position { x: 1.0, y: 1.0 }).unwrap();

        world.despawn_deferred(a);
        world.despawn_deferred(b);
        world.despawn(b).unwrap();

        assert_eq!(world.flush_deferred(), 1);
        assert!(!world.is_alive(a));
        assert_eq!(world.storage::<Position>().unwrap().read().len(), 0);
        assert_eq!(world.flush_deferred(), 0);
        assert_eq!(world.capacity(), 2);
    }

    #[test]
    fn insert_on_dead_entity_fails() {
        let world = World::new();
        world.register_component::<Position>();
        let e = world.spawn().unwrap();
        world.despawn(e).unwrap();
        assert!(matches!(
            world.insert(e, Position { x: 0.0, y: 0.0 }),
            Err(CgsError::EntityNotFound(_))
        ));
    }

    #[test]
    fn unregistered_component_is_reported() {
        let world = World::new();
        let e = world.spawn().unwrap();
        assert!(matches!(
            world.insert(e, Position { x: 0.0, y: 0.0 }),
            Err(CgsError::ComponentNotFound(_))
        ));
    }
}
