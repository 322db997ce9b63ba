//! Grid-based spatial partitioning over entity positions.
//!
//! World space is divided into uniform square cells on the X/Z plane
//! (Y is up). Only occupied cells are stored, so large and mostly empty
//! worlds stay cheap. Radius queries return every entity in the cells
//! overlapping the query circle; callers that need exact distances do
//! their own fine filtering against entity positions.

use std::collections::HashMap;

use cgs_ecs::Entity;

use crate::components::Position;

/// World units per cell edge.
pub const DEFAULT_CELL_SIZE: f32 = 32.0;

/// Grid cell coordinate on the X/Z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

/// Sparse uniform grid of entities, keyed by cell.
pub struct SpatialIndex {
    cell_size: f32,
    cells: HashMap<CellCoord, Vec<Entity>>,
    entity_cells: HashMap<Entity, CellCoord>,
}

impl SpatialIndex {
    /// Creates an index with the given cell edge length. Non-positive
    /// sizes fall back to [`DEFAULT_CELL_SIZE`].
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 {
                cell_size
            } else {
                DEFAULT_CELL_SIZE
            },
            cells: HashMap::new(),
            entity_cells: HashMap::new(),
        }
    }

    /// Starts tracking an entity at a position. Tracked entities are
    /// moved instead.
    pub fn insert(&mut self, entity: Entity, position: Position) {
        let cell = self.world_to_cell(position);
        match self.entity_cells.get_mut(&entity) {
            Some(current) if *current == cell => {}
            Some(current) => {
                let old = *current;
                *current = cell;
                remove_from_cell(&mut self.cells, entity, old);
                self.cells.entry(cell).or_default().push(entity);
            }
            None => {
                self.entity_cells.insert(entity, cell);
                self.cells.entry(cell).or_default().push(entity);
            }
        }
    }

    /// Moves a tracked entity; untracked entities are inserted.
    pub fn update(&mut self, entity: Entity, position: Position) {
        self.insert(entity, position);
    }

    /// Stops tracking an entity. No-op when untracked.
    pub fn remove(&mut self, entity: Entity) {
        if let Some(cell) = self.entity_cells.remove(&entity) {
            remove_from_cell(&mut self.cells, entity, cell);
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entity_cells.clear();
    }

    /// Entities in every cell overlapping the circle at `center`. Coarse:
    /// includes cell-mates slightly outside the exact radius.
    pub fn query_radius(&self, center: Position, radius: f32) -> Vec<Entity> {
        let mut result = Vec::new();
        if radius <= 0.0 {
            return result;
        }
        let min_x = ((center.x - radius) / self.cell_size).floor() as i32;
        let max_x = ((center.x + radius) / self.cell_size).floor() as i32;
        let min_y = ((center.z - radius) / self.cell_size).floor() as i32;
        let max_y = ((center.z + radius) / self.cell_size).floor() as i32;

        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(entities) = self.cells.get(&CellCoord { x: cx, y: cy }) {
                    result.extend_from_slice(entities);
                }
            }
        }
        result
    }

    /// Entities sharing a cell with the given position.
    pub fn query_position(&self, position: Position) -> Vec<Entity> {
        let cell = self.world_to_cell(position);
        self.query_cell(cell.x, cell.y)
    }

    /// Entities in the cell at grid coordinate `(x, y)`.
    pub fn query_cell(&self, x: i32, y: i32) -> Vec<Entity> {
        self.cells
            .get(&CellCoord { x, y })
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_cells.contains_key(&entity)
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entity_cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_cells.is_empty()
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing a world position.
    pub fn world_to_cell(&self, position: Position) -> CellCoord {
        CellCoord {
            x: (position.x / self.cell_size).floor() as i32,
            y: (position.z / self.cell_size).floor() as i32,
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

fn remove_from_cell(cells: &mut HashMap<CellCoord, Vec<Entity>>, entity: Entity, cell: CellCoord) {
    if let Some(entities) = cells.get_mut(&cell) {
        entities.retain(|e| *e != entity);
        if entities.is_empty() {
            cells.remove(&cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, z: f32) -> Position {
        Position { x, y: 0.0, z }
    }

    #[test]
    fn insert_update_remove() {
        let mut index = SpatialIndex::new(10.0);
        let e = Entity::new(1, 0);

        index.insert(e, at(5.0, 5.0));
        assert!(index.contains(e));
        assert_eq!(index.query_position(at(5.0, 5.0)), vec![e]);

        // Moving across a cell boundary re-homes the entity.
        index.update(e, at(25.0, 5.0));
        assert!(index.query_position(at(5.0, 5.0)).is_empty());
        assert_eq!(index.query_position(at(25.0, 5.0)), vec![e]);

        index.remove(e);
        assert!(index.is_empty());
        index.remove(e); // no-op
    }

    #[test]
    fn radius_query_covers_overlapping_cells() {
        let mut index = SpatialIndex::new(10.0);
        let near = Entity::new(1, 0);
        let edge = Entity::new(2, 0);
        let far = Entity::new(3, 0);
        index.insert(near, at(1.0, 1.0));
        index.insert(edge, at(12.0, 0.0));
        index.insert(far, at(100.0, 100.0));

        let mut found = index.query_radius(at(0.0, 0.0), 15.0);
        found.sort();
        assert_eq!(found, vec![near, edge]);

        assert!(index.query_radius(at(0.0, 0.0), 0.0).is_empty());
    }

    #[test]
    fn negative_coordinates_map_to_their_own_cells() {
        let mut index = SpatialIndex::new(10.0);
        let e = Entity::new(1, 0);
        index.insert(e, at(-1.0, -1.0));

        assert_eq!(index.world_to_cell(at(-1.0, -1.0)), CellCoord { x: -1, y: -1 });
        assert_eq!(index.query_cell(-1, -1), vec![e]);
        assert!(index.query_cell(0, 0).is_empty());
    }

    #[test]
    fn only_x_and_z_matter() {
        let mut index = SpatialIndex::new(10.0);
        let e = Entity::new(1, 0);
        index.insert(e, Position { x: 5.0, y: 500.0, z: 5.0 });
        assert_eq!(index.query_position(at(5.0, 5.0)), vec![e]);
    }

    #[test]
    fn update_within_same_cell_is_stable() {
        let mut index = SpatialIndex::new(10.0);
        let e = Entity::new(1, 0);
        index.insert(e, at(1.0, 1.0));
        index.update(e, at(2.0, 2.0));
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_position(at(1.0, 1.0)), vec![e]);
    }

    #[test]
    fn bad_cell_size_falls_back_to_default() {
        let index = SpatialIndex::new(0.0);
        assert_eq!(index.cell_size(), DEFAULT_CELL_SIZE);
    }
}
