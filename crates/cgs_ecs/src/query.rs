//! Component queries over the [`World`].
//!
//! Queries iterate the smallest participating storage and probe the rest,
//! holding read (or one write) guards for the duration of the closure.
//! Multi-component queries require distinct component types so a single
//! storage lock is never taken twice.

use std::any::TypeId;

use cgs_foundation::error::{CgsError, CgsResult};

use crate::entity::Entity;
use crate::storage::Component;
use crate::world::World;

fn distinct(ids: &[TypeId]) -> CgsResult<()> {
    for (i, a) in ids.iter().enumerate() {
        if ids[i + 1..].contains(a) {
            return Err(CgsError::InvalidArgument(
                "query component types must be distinct".to_string(),
            ));
        }
    }
    Ok(())
}

impl World {
    /// Visits every entity holding an `A` component.
    pub fn for_each<A: Component>(
        &self,
        mut f: impl FnMut(Entity, &A),
    ) -> CgsResult<()> {
        let storage = self.storage::<A>()?;
        let guard = storage.read();
        for (entity, a) in guard.iter() {
            f(entity, a);
        }
        Ok(())
    }

    /// Visits every entity holding an `A` component, mutably.
    pub fn for_each_mut<A: Component>(
        &self,
        mut f: impl FnMut(Entity, &mut A),
    ) -> CgsResult<()> {
        let storage = self.storage::<A>()?;
        let mut guard = storage.write();
        for (entity, a) in guard.iter_mut() {
            f(entity, a);
        }
        Ok(())
    }

    /// Visits entities whose `A` component changed after version `since`.
    pub fn for_each_changed<A: Component>(
        &self,
        since: u64,
        mut f: impl FnMut(Entity, &A),
    ) -> CgsResult<()> {
        let storage = self.storage::<A>()?;
        let guard = storage.read();
        for (entity, a) in guard.iter() {
            if guard.changed_since(entity, since) {
                f(entity, a);
            }
        }
        Ok(())
    }

    /// Visits every entity holding both `A` and `B`.
    pub fn query2<A: Component, B: Component>(
        &self,
        mut f: impl FnMut(Entity, &A, &B),
    ) -> CgsResult<()> {
        distinct(&[TypeId::of::<A>(), TypeId::of::<B>()])?;
        let sa = self.storage::<A>()?;
        let sb = self.storage::<B>()?;
        let ga = sa.read();
        let gb = sb.read();

        if ga.len() <= gb.len() {
            for (entity, a) in ga.iter() {
                if let Some(b) = gb.get(entity) {
                    f(entity, a, b);
                }
            }
        } else {
            for (entity, b) in gb.iter() {
                if let Some(a) = ga.get(entity) {
                    f(entity, a, b);
                }
            }
        }
        Ok(())
    }

    /// Visits every entity holding both `A` and `B`, with `A` mutable.
    pub fn query2_mut<A: Component, B: Component>(
        &self,
        mut f: impl FnMut(Entity, &mut A, &B),
    ) -> CgsResult<()> {
        distinct(&[TypeId::of::<A>(), TypeId::of::<B>()])?;
        let sa = self.storage::<A>()?;
        let sb = self.storage::<B>()?;
        let mut ga = sa.write();
        let gb = sb.read();

        // Snapshot the driving entity list so mutable probes below do not
        // alias the iteration.
        let entities: Vec<Entity> = ga.entities().to_vec();
        for entity in entities {
            if let Some(b) = gb.get(entity) {
                if let Some(a) = ga.get_mut(entity) {
                    f(entity, a, b);
                }
            }
        }
        Ok(())
    }

    /// Visits every entity holding `A`, `B`, and `C`.
    pub fn query3<A: Component, B: Component, C: Component>(
        &self,
        mut f: impl FnMut(Entity, &A, &B, &C),
    ) -> CgsResult<()> {
        distinct(&[TypeId::of::<A>(), TypeId::of::<B>(), TypeId::of::<C>()])?;
        let sa = self.storage::<A>()?;
        let sb = self.storage::<B>()?;
        let sc = self.storage::<C>()?;
        let ga = sa.read();
        let gb = sb.read();
        let gc = sc.read();

        // Drive from the smallest storage.
        let lens = [ga.len(), gb.len(), gc.len()];
        let driver = lens
            .iter()
            .enumerate()
            .min_by_key(|(_, len)| **len)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let entities: &[Entity] = match driver {
            0 => ga.entities(),
            1 => gb.entities(),
            _ => gc.entities(),
        };

        for &entity in entities {
            if let (Some(a), Some(b), Some(c)) = (ga.get(entity), gb.get(entity), gc.get(entity)) {
                f(entity, a, b, c);
            }
        }
        Ok(())
    }

    /// Visits entities holding `A` but not `Excluded`.
    pub fn query_without<A: Component, Excluded: Component>(
        &self,
        mut f: impl FnMut(Entity, &A),
    ) -> CgsResult<()> {
        distinct(&[TypeId::of::<A>(), TypeId::of::<Excluded>()])?;
        let sa = self.storage::<A>()?;
        let sx = self.storage::<Excluded>()?;
        let ga = sa.read();
        let gx = sx.read();

        for (entity, a) in ga.iter() {
            if !gx.contains(entity) {
                f(entity, a);
            }
        }
        Ok(())
    }
}
