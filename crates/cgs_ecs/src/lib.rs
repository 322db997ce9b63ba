//! Entity component system for the common game server framework.
//!
//! - [`entity`] - Packed `u32` handles with generational versions
//! - [`world`] - Entity lifetimes and per-type component storages
//! - [`storage`] - Sparse-set storage with change tracking
//! - [`query`] - Multi-component iteration over the world
//! - [`scheduler`] - Staged, dependency-ordered, parallel system execution

pub mod entity;
pub mod query;
pub mod scheduler;
pub mod storage;
pub mod world;

pub use entity::{Entity, MAX_ENTITY_INDEX};
pub use scheduler::{
    System, SystemAccess, SystemId, SystemScheduler, SystemStage, DEFAULT_FIXED_TIMESTEP,
};
pub use storage::{Component, ComponentStorage};
pub use world::{EntityManager, World};
