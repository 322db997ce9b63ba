//! Sparse-set component storage with change tracking.
//!
//! Components live in a dense array for cache-friendly iteration; a sparse
//! array maps entity indices to dense slots. Removal swap-removes, so
//! iteration order is unspecified. Each dense slot carries a change version
//! bumped on mutable access, which queries use to skip unchanged data.

use cgs_foundation::error::{CgsError, CgsResult};

use crate::entity::Entity;

/// Marker for types storable as components.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

const TOMBSTONE: u32 = u32::MAX;

/// Dense storage for a single component type.
pub struct ComponentStorage<T: Component> {
    sparse: Vec<u32>,
    entities: Vec<Entity>,
    data: Vec<T>,
    change_versions: Vec<u64>,
    global_version: u64,
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            data: Vec::new(),
            change_versions: Vec::new(),
            global_version: 0,
        }
    }
}

impl<T: Component> ComponentStorage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a component to `entity`.
    ///
    /// # Errors
    /// Returns [`CgsError::AlreadyExists`] when the entity already has one;
    /// use [`ComponentStorage::replace`] to overwrite.
    pub fn insert(&mut self, entity: Entity, value: T) -> CgsResult<()> {
        if self.dense_index(entity).is_some() {
            return Err(CgsError::AlreadyExists(format!(
                "component already attached to {entity}"
            )));
        }
        self.push_new(entity, value);
        Ok(())
    }

    /// Inserts or overwrites the component, returning the previous value
    /// if one existed.
    pub fn replace(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(dense) = self.dense_index(entity) {
            self.global_version += 1;
            self.change_versions[dense] = self.global_version;
            return Some(std::mem::replace(&mut self.data[dense], value));
        }
        self.push_new(entity, value);
        None
    }

    fn push_new(&mut self, entity: Entity, value: T) -> usize {
        self.global_version += 1;
        let index = entity.index() as usize;
        if index >= self.sparse.len() {
            self.sparse.resize(index + 1, TOMBSTONE);
        }
        let dense = self.entities.len();
        self.sparse[index] = dense as u32;
        self.entities.push(entity);
        self.data.push(value);
        self.change_versions.push(self.global_version);
        dense
    }

    /// Shared access to the component for `entity`.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.dense_index(entity).map(|dense| &self.data[dense])
    }

    /// Mutable access; marks the slot changed.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let dense = self.dense_index(entity)?;
        self.global_version += 1;
        self.change_versions[dense] = self.global_version;
        Some(&mut self.data[dense])
    }

    /// Mutable access, inserting a value built by `f` when absent.
    pub fn get_or_insert_with(&mut self, entity: Entity, f: impl FnOnce() -> T) -> &mut T {
        let dense = match self.dense_index(entity) {
            Some(dense) => {
                self.global_version += 1;
                self.change_versions[dense] = self.global_version;
                dense
            }
            None => self.push_new(entity, f()),
        };
        &mut self.data[dense]
    }

    /// Marks the slot changed without touching the value.
    pub fn mark_changed(&mut self, entity: Entity) {
        if let Some(dense) = self.dense_index(entity) {
            self.global_version += 1;
            self.change_versions[dense] = self.global_version;
        }
    }

    /// Version recorded at the component's last write.
    pub fn version_of(&self, entity: Entity) -> Option<u64> {
        self.dense_index(entity)
            .map(|dense| self.change_versions[dense])
    }

    /// Removes the component for `entity` by swap-remove.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let dense = self.dense_index(entity)?;
        let last = self.entities.len() - 1;

        self.entities.swap_remove(dense);
        self.change_versions.swap_remove(dense);
        let value = self.data.swap_remove(dense);

        if dense != last {
            // The former last element moved into the vacated slot.
            let moved = self.entities[dense];
            self.sparse[moved.index() as usize] = dense as u32;
        }
        self.sparse[entity.index() as usize] = TOMBSTONE;
        self.global_version += 1;
        Some(value)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_index(entity).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Entities currently holding this component, in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterates all components with their owning entities.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }

    /// Mutable iteration; every visited slot is marked changed.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.global_version += 1;
        let version = self.global_version;
        for v in &mut self.change_versions {
            *v = version;
        }
        self.entities.iter().copied().zip(self.data.iter_mut())
    }

    /// True when the component was written after `since`.
    pub fn changed_since(&self, entity: Entity, since: u64) -> bool {
        self.dense_index(entity)
            .map(|dense| self.change_versions[dense] > since)
            .unwrap_or(false)
    }

    /// Monotonic version bumped on every write to this storage.
    pub fn global_version(&self) -> u64 {
        self.global_version
    }

    pub fn clear(&mut self) {
        self.sparse.clear();
        self.entities.clear();
        self.data.clear();
        self.change_versions.clear();
        self.global_version += 1;
    }

    fn dense_index(&self, entity: Entity) -> Option<usize> {
        if !entity.is_valid() {
            return None;
        }
        let dense = *self.sparse.get(entity.index() as usize)?;
        if dense == TOMBSTONE {
            return None;
        }
        let dense = dense as usize;
        // Stale handles (same index, older version) must not match.
        if self.entities[dense] != entity {
            return None;
        }
        Some(dense)
    }
}
