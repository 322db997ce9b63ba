//! Gameplay systems: velocity integration, health regeneration and
//! spatial index upkeep.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use cgs_ecs::{System, SystemAccess, SystemStage, World};

use crate::components::{Health, Position, Velocity};
use crate::spatial::SpatialIndex;

/// Integrates velocity into position every update.
pub struct MovementSystem;

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn access(&self) -> SystemAccess {
        SystemAccess::new().write::<Position>().read::<Velocity>()
    }

    fn run(&mut self, world: &World, dt: f32) {
        let result = world.query2_mut::<Position, Velocity>(|_, pos, vel| {
            pos.x += vel.dx * dt;
            pos.y += vel.dy * dt;
            pos.z += vel.dz * dt;
        });
        if let Err(e) = result {
            warn!(error = %e, "movement system skipped");
        }
    }
}

/// Regenerates health on the fixed-update clock so regen rate is
/// independent of frame rate.
pub struct RegenSystem;

impl System for RegenSystem {
    fn name(&self) -> &str {
        "health_regen"
    }

    fn stage(&self) -> SystemStage {
        SystemStage::FixedUpdate
    }

    fn access(&self) -> SystemAccess {
        SystemAccess::new().write::<Health>()
    }

    fn run(&mut self, world: &World, dt: f32) {
        let result = world.for_each_mut::<Health>(|_, health| {
            if health.is_alive() && health.current < health.max {
                health.heal(health.regen_per_sec * dt);
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "regen system skipped");
        }
    }
}

/// Mirrors entity positions into the shared spatial index after movement
/// has run, so radius queries made between frames see current positions.
pub struct SpatialSyncSystem {
    index: Arc<RwLock<SpatialIndex>>,
}

impl SpatialSyncSystem {
    pub fn new(index: Arc<RwLock<SpatialIndex>>) -> Self {
        Self { index }
    }
}

impl System for SpatialSyncSystem {
    fn name(&self) -> &str {
        "spatial_sync"
    }

    fn stage(&self) -> SystemStage {
        SystemStage::PostUpdate
    }

    fn access(&self) -> SystemAccess {
        SystemAccess::new().read::<Position>()
    }

    fn run(&mut self, world: &World, _dt: f32) {
        let mut index = self.index.write();
        let result = world.for_each::<Position>(|entity, position| {
            index.update(entity, *position);
        });
        if let Err(e) = result {
            warn!(error = %e, "spatial sync skipped");
        }
        // Despawned entities keep a stale cell until removed by the
        // despawn path; the plugin calls SpatialIndex::remove there.
    }
}
