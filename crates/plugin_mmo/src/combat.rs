//! Damage resolution and threat tracking.
//!
//! Gameplay code enqueues [`DamageEvent`]s on a shared [`DamageQueue`];
//! the [`CombatSystem`] drains the queue each update, mitigates damage
//! against the victim's defenses and applies the result to health and
//! threat. Mitigation uses diminishing-returns curves so stacking armor
//! never reaches full immunity.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use cgs_ecs::{Entity, System, SystemAccess, World};

use crate::components::Health;

/// Critical hits double pre-mitigation damage.
pub const CRIT_MULTIPLIER: f32 = 2.0;
/// Armor soak constant: armor/(armor + this) of physical damage is absorbed.
pub const ARMOR_CONSTANT: f32 = 400.0;
/// Resistance soak constant for magical damage.
pub const RESISTANCE_CONSTANT: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageType {
    Physical,
    Magical,
}

/// Mitigation stats carried by damageable entities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Defenses {
    pub armor: f32,
    pub resistance: f32,
}

/// One attack awaiting resolution.
#[derive(Debug, Clone, Copy)]
pub struct DamageEvent {
    pub attacker: Entity,
    pub victim: Entity,
    pub base_damage: f32,
    pub damage_type: DamageType,
    pub critical: bool,
}

/// Per-entity threat table, kept sorted by descending threat.
#[derive(Debug, Clone, Default)]
pub struct ThreatList {
    entries: Vec<(Entity, f32)>,
}

impl ThreatList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates threat for a source and re-sorts.
    pub fn add_threat(&mut self, source: Entity, amount: f32) {
        match self.entries.iter_mut().find(|(e, _)| *e == source) {
            Some((_, threat)) => *threat += amount,
            None => self.entries.push((source, amount)),
        }
        self.entries
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Drops a source, e.g. when it dies or leaves range.
    pub fn remove(&mut self, source: Entity) {
        self.entries.retain(|(e, _)| *e != source);
    }

    /// Highest-threat source, if any.
    pub fn top_threat(&self) -> Option<Entity> {
        self.entries.first().map(|(e, _)| *e)
    }

    pub fn threat(&self, source: Entity) -> f32 {
        self.entries
            .iter()
            .find(|(e, _)| *e == source)
            .map(|(_, t)| *t)
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Entity, f32)] {
        &self.entries
    }
}

/// Mitigated damage for a hit. Non-positive base damage deals nothing;
/// any positive hit deals at least one point after mitigation.
pub fn calculate_damage(
    base_damage: f32,
    damage_type: DamageType,
    critical: bool,
    defenses: Defenses,
) -> f32 {
    if base_damage <= 0.0 {
        return 0.0;
    }
    let mut damage = base_damage;
    if critical {
        damage *= CRIT_MULTIPLIER;
    }
    let soak = match damage_type {
        DamageType::Physical => defenses.armor / (defenses.armor + ARMOR_CONSTANT),
        DamageType::Magical => defenses.resistance / (defenses.resistance + RESISTANCE_CONSTANT),
    };
    (damage * (1.0 - soak)).max(1.0)
}

/// Shared handle for enqueueing damage from gameplay code.
#[derive(Clone, Default)]
pub struct DamageQueue {
    events: Arc<Mutex<Vec<DamageEvent>>>,
}

impl DamageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: DamageEvent) {
        self.events.lock().push(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn drain(&self) -> Vec<DamageEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// Applies queued damage to victims and credits attacker threat.
pub struct CombatSystem {
    queue: DamageQueue,
}

impl CombatSystem {
    pub fn new(queue: DamageQueue) -> Self {
        Self { queue }
    }
}

impl System for CombatSystem {
    fn name(&self) -> &str {
        "combat"
    }

    fn access(&self) -> SystemAccess {
        SystemAccess::new()
            .write::<Health>()
            .write::<ThreatList>()
            .read::<Defenses>()
    }

    fn run(&mut self, world: &World, _dt: f32) {
        for event in self.queue.drain() {
            let defenses = world.get_cloned::<Defenses>(event.victim).unwrap_or_default();
            let damage =
                calculate_damage(event.base_damage, event.damage_type, event.critical, defenses);
            if damage <= 0.0 {
                continue;
            }

            let applied = apply_to_victim(world, event.victim, event.attacker, damage);
            if let Err(e) = applied {
                warn!(error = %e, victim = %event.victim, "damage event dropped");
            }
        }
    }
}

fn apply_to_victim(
    world: &World,
    victim: Entity,
    attacker: Entity,
    damage: f32,
) -> cgs_foundation::error::CgsResult<()> {
    {
        let storage = world.storage::<Health>()?;
        let mut storage = storage.write();
        if let Some(health) = storage.get_mut(victim) {
            if !health.is_alive() {
                return Ok(());
            }
            health.apply_damage(damage);
        } else {
            return Ok(());
        }
    }
    let storage = world.storage::<ThreatList>()?;
    let mut storage = storage.write();
    if let Some(threat) = storage.get_mut(victim) {
        threat.add_threat(attacker, damage);
    }
    Ok(())
}
