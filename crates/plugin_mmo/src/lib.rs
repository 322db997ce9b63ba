//! Built-in MMO gameplay plugin.
//!
//! Owns its own [`World`] and scheduler: movement integrates on the
//! variable update, health regen ticks on the fixed update, combat
//! drains the damage queue and the spatial index is refreshed post
//! update. Entity state serializes to JSON for hot-reload carry-over.

pub mod combat;
pub mod components;
pub mod spatial;
pub mod systems;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cgs_ecs::{Entity, SystemScheduler, World};
use cgs_foundation::error::CgsResult;
use cgs_plugin::{register_static_plugin, Plugin, PluginContext, Version};

pub use combat::{
    calculate_damage, CombatSystem, DamageEvent, DamageQueue, DamageType, Defenses, ThreatList,
};
pub use components::{Health, Position, Velocity};
pub use spatial::{SpatialIndex, DEFAULT_CELL_SIZE};
pub use systems::{MovementSystem, RegenSystem, SpatialSyncSystem};

#[derive(Serialize, Deserialize)]
struct SavedEntity {
    position: Position,
    velocity: Option<Velocity>,
    health: Option<Health>,
    #[serde(default)]
    defenses: Option<Defenses>,
}

#[derive(Serialize, Deserialize)]
struct SavedState {
    entities: Vec<SavedEntity>,
}

/// Core gameplay plugin: player entities with movement, regen, combat
/// and proximity queries.
pub struct MmoPlugin {
    world: World,
    scheduler: SystemScheduler,
    spatial: Arc<RwLock<SpatialIndex>>,
    damage: DamageQueue,
}

impl MmoPlugin {
    pub fn new() -> Self {
        let world = World::new();
        world.register_component::<Position>();
        world.register_component::<Velocity>();
        world.register_component::<Health>();
        world.register_component::<Defenses>();
        world.register_component::<ThreatList>();
        Self {
            world,
            scheduler: SystemScheduler::new(),
            spatial: Arc::new(RwLock::new(SpatialIndex::default())),
            damage: DamageQueue::new(),
        }
    }

    /// Spawns a player entity with full health and empty defenses.
    pub fn spawn_player(&self, position: Position) -> CgsResult<Entity> {
        let entity = self.world.spawn()?;
        self.world.insert(entity, position)?;
        self.world.insert(entity, Velocity::default())?;
        self.world.insert(entity, Health::full(100.0, 5.0))?;
        self.world.insert(entity, Defenses::default())?;
        self.world.insert(entity, ThreatList::new())?;
        self.spatial.write().insert(entity, position);
        Ok(entity)
    }

    /// Removes an entity from the world and the spatial index.
    pub fn despawn(&self, entity: Entity) -> CgsResult<()> {
        self.world.despawn(entity)?;
        self.spatial.write().remove(entity);
        Ok(())
    }

    /// Queues an attack for resolution on the next update.
    pub fn deal_damage(&self, event: DamageEvent) {
        self.damage.push(event);
    }

    /// Entities whose grid cells overlap the circle at `center`.
    pub fn entities_near(&self, center: Position, radius: f32) -> Vec<Entity> {
        self.spatial.read().query_radius(center, radius)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Adds this plugin to the static registry so the server picks it up.
    pub fn register() {
        register_static_plugin(|| Box::new(MmoPlugin::new()));
    }
}

impl Default for MmoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MmoPlugin {
    fn name(&self) -> &str {
        "mmo_core"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0)
    }

    fn on_init(&mut self, _ctx: &PluginContext) -> CgsResult<()> {
        self.scheduler.add_system(MovementSystem)?;
        self.scheduler.add_system(RegenSystem)?;
        self.scheduler
            .add_system(CombatSystem::new(self.damage.clone()))?;
        self.scheduler
            .add_system(SpatialSyncSystem::new(self.spatial.clone()))?;
        info!(entities = self.world.alive_count(), "mmo plugin initialized");
        Ok(())
    }

    fn on_update(&mut self, _ctx: &PluginContext, dt: f32) {
        if let Err(e) = self.scheduler.run(&self.world, dt) {
            warn!(error = %e, "mmo plugin update failed");
        }
    }

    fn capture_state(&self) -> Option<Vec<u8>> {
        let mut entities = Vec::new();
        let collected = self.world.for_each::<Position>(|entity, position| {
            entities.push(SavedEntity {
                position: *position,
                velocity: self.world.get_cloned::<Velocity>(entity),
                health: self.world.get_cloned::<Health>(entity),
                defenses: self.world.get_cloned::<Defenses>(entity),
            });
        });
        if collected.is_err() {
            return None;
        }
        serde_json::to_vec(&SavedState { entities }).ok()
    }

    fn restore_state(&mut self, state: &[u8]) -> CgsResult<()> {
        let saved: SavedState = serde_json::from_slice(state).map_err(|e| {
            cgs_foundation::CgsError::InvalidArgument(format!("bad plugin state: {e}"))
        })?;
        for entry in saved.entities {
            let entity = self.world.spawn()?;
            self.world.insert(entity, entry.position)?;
            if let Some(velocity) = entry.velocity {
                self.world.insert(entity, velocity)?;
            }
            if let Some(health) = entry.health {
                self.world.insert(entity, health)?;
            }
            if let Some(defenses) = entry.defenses {
                self.world.insert(entity, defenses)?;
            }
            self.spatial.write().insert(entity, entry.position);
        }
        info!(entities = self.world.alive_count(), "mmo plugin state restored");
        Ok(())
    }
}
