//! Staged system scheduler with dependency ordering and parallel batches.
//!
//! Systems are grouped into stages that run in a fixed order each frame:
//! `PreUpdate`, `Update`, any due `FixedUpdate` steps, then `PostUpdate`.
//! Within a stage, declared dependencies are topologically sorted and the
//! resulting order is packed into batches of systems whose component access
//! sets do not conflict; each batch runs in parallel on the rayon pool.
//! Sync points ([`SystemScheduler::add_sync_point`]) force a hard batch
//! boundary after a given system.
//!
//! `FixedUpdate` runs on an accumulator: every frame's delta is banked and
//! the stage steps at [`SystemScheduler::set_fixed_timestep`] granularity
//! (default 1/60 s) as many times as the bank covers.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use cgs_foundation::error::{CgsError, CgsResult};

use crate::storage::Component;
use crate::world::World;

/// Default fixed-update step, in seconds.
pub const DEFAULT_FIXED_TIMESTEP: f32 = 1.0 / 60.0;

/// Cap on fixed-update steps taken in a single frame. When a frame falls
/// further behind, the remaining debt is dropped instead of spiraling.
const MAX_FIXED_STEPS_PER_FRAME: u32 = 8;

/// Identifies a registered system by its concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(TypeId);

impl SystemId {
    pub fn of<S: 'static>() -> Self {
        SystemId(TypeId::of::<S>())
    }
}

/// Execution stage a system belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemStage {
    PreUpdate,
    Update,
    FixedUpdate,
    PostUpdate,
}

/// Declared component access of a system, used for conflict detection.
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    reads: Vec<TypeId>,
    writes: Vec<TypeId>,
}

impl SystemAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a shared read of component `T`.
    pub fn read<T: Component>(mut self) -> Self {
        self.reads.push(TypeId::of::<T>());
        self
    }

    /// Declares an exclusive write of component `T`.
    pub fn write<T: Component>(mut self) -> Self {
        self.writes.push(TypeId::of::<T>());
        self
    }

    /// Two systems conflict when either writes what the other touches.
    /// An empty access set is treated as touching everything, so a system
    /// that declares nothing conflicts with every other system.
    fn conflicts_with(&self, other: &Self) -> bool {
        if self.is_undeclared() || other.is_undeclared() {
            return true;
        }
        let hits = |writes: &[TypeId], other: &SystemAccess| {
            writes
                .iter()
                .any(|w| other.reads.contains(w) || other.writes.contains(w))
        };
        hits(&self.writes, other) || hits(&other.writes, self)
    }

    fn is_undeclared(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

/// A unit of game logic run by the scheduler.
pub trait System: Send {
    fn name(&self) -> &str;

    fn stage(&self) -> SystemStage {
        SystemStage::Update
    }

    /// Component access set. Systems that declare nothing are scheduled
    /// exclusively, never sharing a batch with any other system.
    fn access(&self) -> SystemAccess {
        SystemAccess::default()
    }

    /// Systems that must complete before this one, within the same stage.
    fn dependencies(&self) -> Vec<SystemId> {
        Vec::new()
    }

    fn run(&mut self, world: &World, dt: f32);
}

struct SystemEntry {
    id: SystemId,
    name: String,
    access: SystemAccess,
    dependencies: Vec<SystemId>,
    system: Mutex<Box<dyn System>>,
}

/// Owns all registered systems and drives them each frame.
pub struct SystemScheduler {
    systems: HashMap<SystemStage, Vec<Arc<SystemEntry>>>,
    batches: HashMap<SystemStage, Vec<Vec<Arc<SystemEntry>>>>,
    sync_points: HashSet<SystemId>,
    disabled: HashSet<SystemId>,
    dirty: bool,
    parallel: bool,
    fixed_timestep: f32,
    accumulator: f32,
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self {
            systems: HashMap::new(),
            batches: HashMap::new(),
            sync_points: HashSet::new(),
            disabled: HashSet::new(),
            dirty: false,
            parallel: true,
            fixed_timestep: DEFAULT_FIXED_TIMESTEP,
            accumulator: 0.0,
        }
    }
}

impl SystemScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system. Its stage, access set, and dependencies are read
    /// once at registration.
    ///
    /// # Errors
    /// Returns [`CgsError::AlreadyExists`] when a system of the same type
    /// is already registered.
    pub fn add_system<S: System + 'static>(&mut self, system: S) -> CgsResult<SystemId> {
        let id = SystemId::of::<S>();
        if self.find(id).is_some() {
            return Err(CgsError::AlreadyExists(system.name().to_string()));
        }
        let stage = system.stage();
        let entry = Arc::new(SystemEntry {
            id,
            name: system.name().to_string(),
            access: system.access(),
            dependencies: system.dependencies(),
            system: Mutex::new(Box::new(system)),
        });
        self.systems.entry(stage).or_default().push(entry);
        self.dirty = true;
        Ok(id)
    }

    /// Removes a system by ID.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] for unknown IDs.
    pub fn remove_system(&mut self, id: SystemId) -> CgsResult<()> {
        for systems in self.systems.values_mut() {
            if let Some(pos) = systems.iter().position(|e| e.id == id) {
                systems.remove(pos);
                self.sync_points.remove(&id);
                self.dirty = true;
                return Ok(());
            }
        }
        Err(CgsError::NotFound("system".to_string()))
    }

    /// Enables or disables a system without removing it. Disabled systems
    /// keep their place in the batch layout and are skipped at run time.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] for unknown IDs.
    pub fn set_enabled(&mut self, id: SystemId, enabled: bool) -> CgsResult<()> {
        if self.find(id).is_none() {
            return Err(CgsError::NotFound("system".to_string()));
        }
        if enabled {
            self.disabled.remove(&id);
        } else {
            self.disabled.insert(id);
        }
        Ok(())
    }

    pub fn is_enabled(&self, id: SystemId) -> bool {
        !self.disabled.contains(&id)
    }

    /// Marks a system as a sync point: everything registered in its stage
    /// that sorts after it is forced into a strictly later batch, even when
    /// their access sets would not conflict.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] for unknown IDs.
    pub fn add_sync_point(&mut self, after: SystemId) -> CgsResult<()> {
        if self.find(after).is_none() {
            return Err(CgsError::NotFound("system".to_string()));
        }
        self.sync_points.insert(after);
        self.dirty = true;
        Ok(())
    }

    /// Toggles parallel batch execution. When off, batches run one system
    /// at a time in the same order.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Overrides the fixed-update step length.
    pub fn set_fixed_timestep(&mut self, seconds: f32) {
        if seconds > 0.0 {
            self.fixed_timestep = seconds;
        }
    }

    pub fn fixed_timestep(&self) -> f32 {
        self.fixed_timestep
    }

    /// Number of registered systems across all stages.
    pub fn system_count(&self) -> usize {
        self.systems.values().map(Vec::len).sum()
    }

    /// Runs one frame: variable stages with `delta_seconds`, plus as many
    /// fixed steps as the accumulator covers.
    ///
    /// # Errors
    /// Returns [`CgsError::SystemError`] when dependency resolution fails
    /// (unknown dependency or cycle).
    pub fn run(&mut self, world: &World, delta_seconds: f32) -> CgsResult<()> {
        if self.dirty {
            self.rebuild()?;
            self.dirty = false;
        }

        self.run_stage(world, SystemStage::PreUpdate, delta_seconds);
        self.run_stage(world, SystemStage::Update, delta_seconds);

        self.accumulator += delta_seconds;
        let mut steps = 0;
        while self.accumulator >= self.fixed_timestep {
            if steps >= MAX_FIXED_STEPS_PER_FRAME {
                warn!(
                    dropped_seconds = self.accumulator,
                    "fixed update falling behind, dropping accumulated time"
                );
                self.accumulator = 0.0;
                break;
            }
            self.run_stage(world, SystemStage::FixedUpdate, self.fixed_timestep);
            self.accumulator -= self.fixed_timestep;
            steps += 1;
        }

        self.run_stage(world, SystemStage::PostUpdate, delta_seconds);
        Ok(())
    }

    fn run_stage(&self, world: &World, stage: SystemStage, dt: f32) {
        let Some(batches) = self.batches.get(&stage) else {
            return;
        };
        for batch in batches {
            let active: Vec<&Arc<SystemEntry>> = batch
                .iter()
                .filter(|e| !self.disabled.contains(&e.id))
                .collect();
            if active.len() <= 1 || !self.parallel {
                for entry in active {
                    entry.system.lock().run(world, dt);
                }
            } else {
                rayon::scope(|scope| {
                    for entry in active {
                        scope.spawn(move |_| {
                            entry.system.lock().run(world, dt);
                        });
                    }
                });
            }
        }
    }

    fn find(&self, id: SystemId) -> Option<&Arc<SystemEntry>> {
        self.systems.values().flatten().find(|e| e.id == id)
    }

    /// Recomputes per-stage topological order and conflict-free batches.
    fn rebuild(&mut self) -> CgsResult<()> {
        let mut batches = HashMap::new();
        let stages = [
            SystemStage::PreUpdate,
            SystemStage::Update,
            SystemStage::FixedUpdate,
            SystemStage::PostUpdate,
        ];
        for stage in stages {
            let Some(systems) = self.systems.get(&stage) else {
                continue;
            };
            if systems.is_empty() {
                continue;
            }
            batches.insert(stage, self.build_stage_batches(systems)?);
        }
        self.batches = batches;
        Ok(())
    }

    fn build_stage_batches(
        &self,
        systems: &[Arc<SystemEntry>],
    ) -> CgsResult<Vec<Vec<Arc<SystemEntry>>>> {
        let positions: HashMap<SystemId, usize> =
            systems.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

        // Kahn's algorithm over same-stage dependency edges.
        let mut indegree = vec![0usize; systems.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); systems.len()];
        for (i, entry) in systems.iter().enumerate() {
            for dep in &entry.dependencies {
                match positions.get(dep) {
                    Some(&dep_pos) => {
                        indegree[i] += 1;
                        dependents[dep_pos].push(i);
                    }
                    // Cross-stage dependencies are satisfied by stage order.
                    None if self.find(*dep).is_some() => {}
                    None => {
                        return Err(CgsError::SystemError(format!(
                            "system '{}' depends on an unregistered system",
                            entry.name
                        )));
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..systems.len()).filter(|&i| indegree[i] == 0).collect();
        let mut topo_order = Vec::with_capacity(systems.len());
        while let Some(i) = queue.pop_front() {
            topo_order.push(i);
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if topo_order.len() != systems.len() {
            return Err(CgsError::SystemError(
                "dependency cycle among systems".to_string(),
            ));
        }

        // Greedy batching: place each system in the earliest batch after all
        // of its dependencies that it does not conflict with. A sync point
        // pushes everything that sorts after it into later batches.
        let mut batches: Vec<Vec<Arc<SystemEntry>>> = Vec::new();
        let mut batch_of: HashMap<SystemId, usize> = HashMap::new();
        let mut minimum_batch = 0;
        for &i in &topo_order {
            let entry = &systems[i];
            let earliest = entry
                .dependencies
                .iter()
                .filter_map(|dep| batch_of.get(dep))
                .map(|&b| b + 1)
                .max()
                .unwrap_or(0)
                .max(minimum_batch);

            let mut target = None;
            for (b, batch) in batches.iter().enumerate().skip(earliest) {
                if batch.iter().all(|other| !entry.access.conflicts_with(&other.access)) {
                    target = Some(b);
                    break;
                }
            }
            let b = match target {
                Some(b) => b,
                None => {
                    while batches.len() < earliest {
                        batches.push(Vec::new());
                    }
                    batches.push(Vec::new());
                    batches.len() - 1
                }
            };
            batches[b].push(entry.clone());
            batch_of.insert(entry.id, b);
            if self.sync_points.contains(&entry.id) {
                minimum_batch = b + 1;
            }
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Tick(u64);

    struct RecordingSystem {
        name: &'static str,
        stage: SystemStage,
        deps: Vec<SystemId>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl System for RecordingSystem {
        fn name(&self) -> &str {
            self.name
        }
        fn stage(&self) -> SystemStage {
            self.stage
        }
        fn dependencies(&self) -> Vec<SystemId> {
            self.deps.clone()
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            self.log.lock().push(self.name);
        }
    }

    struct First(Arc<Mutex<Vec<&'static str>>>);
    struct Second(Arc<Mutex<Vec<&'static str>>>);

    impl System for First {
        fn name(&self) -> &str {
            "first"
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            self.0.lock().push("first");
        }
    }

    impl System for Second {
        fn name(&self) -> &str {
            "second"
        }
        fn dependencies(&self) -> Vec<SystemId> {
            vec![SystemId::of::<First>()]
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            self.0.lock().push("second");
        }
    }

    struct FixedCounter(Arc<Mutex<u32>>);

    impl System for FixedCounter {
        fn name(&self) -> &str {
            "fixed_counter"
        }
        fn stage(&self) -> SystemStage {
            SystemStage::FixedUpdate
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            *self.0.lock() += 1;
        }
    }

    struct MoverA(Arc<Mutex<u32>>);
    struct MoverB(Arc<Mutex<u32>>);

    impl System for MoverA {
        fn name(&self) -> &str {
            "mover_a"
        }
        fn access(&self) -> SystemAccess {
            SystemAccess::new().write::<Tick>()
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            *self.0.lock() += 1;
        }
    }

    impl System for MoverB {
        fn name(&self) -> &str {
            "mover_b"
        }
        fn access(&self) -> SystemAccess {
            SystemAccess::new().write::<Tick>()
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn dependencies_order_execution() {
        let world = World::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = SystemScheduler::new();
        // Registered out of order; dependencies still win.
        scheduler.add_system(Second(log.clone())).unwrap();
        scheduler.add_system(First(log.clone())).unwrap();

        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn stages_run_in_order() {
        let world = World::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = SystemScheduler::new();

        scheduler
            .add_system(RecordingSystem {
                name: "post",
                stage: SystemStage::PostUpdate,
                deps: vec![],
                log: log.clone(),
            })
            .unwrap();

        struct Pre(Arc<Mutex<Vec<&'static str>>>);
        impl System for Pre {
            fn name(&self) -> &str {
                "pre"
            }
            fn stage(&self) -> SystemStage {
                SystemStage::PreUpdate
            }
            fn run(&mut self, _world: &World, _dt: f32) {
                self.0.lock().push("pre");
            }
        }
        scheduler.add_system(Pre(log.clone())).unwrap();

        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*log.lock(), vec!["pre", "post"]);
    }

    #[test]
    fn fixed_update_steps_from_accumulator() {
        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler.set_fixed_timestep(0.1);
        scheduler.add_system(FixedCounter(count.clone())).unwrap();

        scheduler.run(&world, 0.25).unwrap(); // 2 steps, 0.05 banked
        assert_eq!(*count.lock(), 2);

        scheduler.run(&world, 0.05).unwrap(); // bank reaches 0.1 -> 1 step
        assert_eq!(*count.lock(), 3);

        scheduler.run(&world, 0.01).unwrap(); // not enough banked
        assert_eq!(*count.lock(), 3);
    }

    #[test]
    fn conflicting_systems_both_run() {
        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler.add_system(MoverA(count.clone())).unwrap();
        scheduler.add_system(MoverB(count.clone())).unwrap();

        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 2);
    }

    struct Overlap {
        running: Arc<std::sync::atomic::AtomicUsize>,
        overlaps: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Overlap {
        fn run_once(&self) {
            use std::sync::atomic::Ordering;
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct UndeclaredA(Overlap);
    struct UndeclaredB(Overlap);

    impl System for UndeclaredA {
        fn name(&self) -> &str {
            "undeclared_a"
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            self.0.run_once();
        }
    }

    impl System for UndeclaredB {
        fn name(&self) -> &str {
            "undeclared_b"
        }
        fn run(&mut self, _world: &World, _dt: f32) {
            self.0.run_once();
        }
    }

    #[test]
    fn undeclared_access_never_runs_concurrently() {
        let world = World::new();
        let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let overlaps = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler
            .add_system(UndeclaredA(Overlap {
                running: running.clone(),
                overlaps: overlaps.clone(),
            }))
            .unwrap();
        scheduler
            .add_system(UndeclaredB(Overlap {
                running: running.clone(),
                overlaps: overlaps.clone(),
            }))
            .unwrap();

        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(overlaps.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn sync_point_forces_batch_boundary() {
        struct SlowWriter(Arc<Mutex<Vec<&'static str>>>);
        struct OtherWriter(Arc<Mutex<Vec<&'static str>>>);
        struct TickB(u64);

        impl System for SlowWriter {
            fn name(&self) -> &str {
                "slow_writer"
            }
            fn access(&self) -> SystemAccess {
                SystemAccess::new().write::<Tick>()
            }
            fn run(&mut self, _world: &World, _dt: f32) {
                std::thread::sleep(std::time::Duration::from_millis(20));
                self.0.lock().push("slow");
            }
        }
        impl System for OtherWriter {
            fn name(&self) -> &str {
                "other_writer"
            }
            fn access(&self) -> SystemAccess {
                SystemAccess::new().write::<TickB>()
            }
            fn run(&mut self, _world: &World, _dt: f32) {
                self.0.lock().push("other");
            }
        }

        let world = World::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = SystemScheduler::new();
        let slow = scheduler.add_system(SlowWriter(log.clone())).unwrap();
        scheduler.add_system(OtherWriter(log.clone())).unwrap();

        // Disjoint writes would share a batch; the sync point splits them,
        // so the slow system must finish first.
        scheduler.add_sync_point(slow).unwrap();
        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*log.lock(), vec!["slow", "other"]);

        assert!(matches!(
            scheduler.add_sync_point(SystemId::of::<FixedCounter>()),
            Err(CgsError::NotFound(_))
        ));
    }

    #[test]
    fn disabled_systems_are_skipped() {
        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        let id = scheduler.add_system(MoverA(count.clone())).unwrap();

        scheduler.set_enabled(id, false).unwrap();
        assert!(!scheduler.is_enabled(id));
        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 0);

        scheduler.set_enabled(id, true).unwrap();
        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 1);

        assert!(matches!(
            scheduler.set_enabled(SystemId::of::<MoverB>(), false),
            Err(CgsError::NotFound(_))
        ));
    }

    #[test]
    fn sequential_mode_still_runs_everything() {
        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler.set_parallel(false);
        scheduler.add_system(MoverA(count.clone())).unwrap();
        scheduler.add_system(MoverB(count.clone())).unwrap();

        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn duplicate_system_rejected() {
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler.add_system(MoverA(count.clone())).unwrap();
        assert!(matches!(
            scheduler.add_system(MoverA(count)),
            Err(CgsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn cycle_is_detected() {
        struct CycleA(Arc<Mutex<u32>>);
        struct CycleB(Arc<Mutex<u32>>);
        impl System for CycleA {
            fn name(&self) -> &str {
                "cycle_a"
            }
            fn dependencies(&self) -> Vec<SystemId> {
                vec![SystemId::of::<CycleB>()]
            }
            fn run(&mut self, _world: &World, _dt: f32) {}
        }
        impl System for CycleB {
            fn name(&self) -> &str {
                "cycle_b"
            }
            fn dependencies(&self) -> Vec<SystemId> {
                vec![SystemId::of::<CycleA>()]
            }
            fn run(&mut self, _world: &World, _dt: f32) {}
        }

        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        scheduler.add_system(CycleA(count.clone())).unwrap();
        scheduler.add_system(CycleB(count)).unwrap();
        assert!(matches!(
            scheduler.run(&world, 0.016),
            Err(CgsError::SystemError(_))
        ));
    }

    #[test]
    fn remove_system_takes_effect() {
        let world = World::new();
        let count = Arc::new(Mutex::new(0));
        let mut scheduler = SystemScheduler::new();
        let id = scheduler.add_system(MoverA(count.clone())).unwrap();
        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 1);

        scheduler.remove_system(id).unwrap();
        assert_eq!(scheduler.system_count(), 0);
        scheduler.run(&world, 0.016).unwrap();
        assert_eq!(*count.lock(), 1);

        assert!(matches!(
            scheduler.remove_system(id),
            Err(CgsError::NotFound(_))
        ));
    }
}
