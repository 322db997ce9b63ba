//! Priority job scheduler backed by a fixed worker pool.
//!
//! Jobs run on worker threads in priority order (Critical first, FIFO
//! within a priority). A job may declare a dependency on another job, in
//! which case it is held back until the dependency completes. Tick jobs
//! re-run at a fixed interval and are driven by [`JobScheduler::process_tick`]
//! from the game loop.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{CgsError, CgsResult};

/// Handle identifying a scheduled job.
pub type JobId = u64;

/// Job execution priority. Higher priorities are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

struct QueuedJob {
    id: JobId,
    priority: JobPriority,
    seq: u64,
    work: Box<dyn FnOnce() + Send>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority wins; within a priority, earlier
        // sequence numbers (FIFO) win.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TickJob {
    id: JobId,
    interval: Duration,
    elapsed: Duration,
    work: Arc<dyn Fn() + Send + Sync>,
}

/// Terminal job entries retained for late `wait` callers. Older entries
/// are forgotten so the state table stays bounded on long-lived servers.
const MAX_RETAINED_FINISHED: usize = 1024;

#[derive(Default)]
struct SchedulerState {
    queue: BinaryHeap<QueuedJob>,
    states: HashMap<JobId, JobState>,
    dependents: HashMap<JobId, Vec<QueuedJob>>,
    finished_order: VecDeque<JobId>,
    shutdown: bool,
}

impl SchedulerState {
    /// Records a terminal state and evicts the oldest finished entries
    /// past the retention cap.
    fn mark_finished(&mut self, id: JobId, terminal: JobState) {
        let previous = self.states.insert(id, terminal);
        if matches!(
            previous,
            Some(JobState::Completed) | Some(JobState::Cancelled)
        ) {
            return;
        }
        self.finished_order.push_back(id);
        while self.finished_order.len() > MAX_RETAINED_FINISHED {
            if let Some(old) = self.finished_order.pop_front() {
                self.states.remove(&old);
            }
        }
    }

    /// Cancels `id` and, transitively, every job queued behind it via
    /// `schedule_after`.
    fn cancel_with_dependents(&mut self, id: JobId) {
        self.mark_finished(id, JobState::Cancelled);
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(dependents) = self.dependents.remove(&next) {
                for dependent in dependents {
                    self.mark_finished(dependent.id, JobState::Cancelled);
                    stack.push(dependent.id);
                }
            }
        }
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    work_available: Condvar,
    job_finished: Condvar,
}

/// Fixed-size worker pool with priorities, dependencies, and tick jobs.
pub struct JobScheduler {
    shared: Arc<Shared>,
    tick_jobs: Mutex<Vec<TickJob>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    workers: Vec<JoinHandle<()>>,
    // Kept so worker panics surface on shutdown rather than being lost.
    panic_rx: Receiver<String>,
    panic_tx: Sender<String>,
}

impl JobScheduler {
    /// Creates a scheduler with the given number of worker threads.
    ///
    /// Passing `0` uses the machine's logical CPU count.
    ///
    /// # Errors
    /// Returns [`CgsError::SystemError`] when a worker thread cannot be
    /// spawned.
    pub fn new(num_threads: usize) -> CgsResult<Self> {
        let threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::default()),
            work_available: Condvar::new(),
            job_finished: Condvar::new(),
        });

        let (panic_tx, panic_rx) = unbounded();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("cgs-job-{i}"))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| {
                    CgsError::SystemError(format!("failed to spawn job worker: {e}"))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            tick_jobs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            workers,
            panic_rx,
            panic_tx,
        })
    }

    /// Schedules a one-shot job.
    pub fn schedule(
        &self,
        work: impl FnOnce() + Send + 'static,
        priority: JobPriority,
    ) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = self.make_job(id, priority, work);

        let mut state = self.shared.state.lock();
        state.states.insert(id, JobState::Pending);
        state.queue.push(job);
        drop(state);

        self.shared.work_available.notify_one();
        id
    }

    /// Schedules a job that runs only after `dependency` completes.
    ///
    /// If the dependency has already completed the job is enqueued
    /// immediately. A cancelled dependency cancels the dependent as well.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] when the dependency ID is unknown.
    pub fn schedule_after(
        &self,
        dependency: JobId,
        work: impl FnOnce() + Send + 'static,
    ) -> CgsResult<JobId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = self.make_job(id, JobPriority::Normal, work);

        let mut state = self.shared.state.lock();
        match state.states.get(&dependency) {
            None => Err(CgsError::NotFound(format!("job {dependency}"))),
            Some(JobState::Completed) => {
                state.states.insert(id, JobState::Pending);
                state.queue.push(job);
                drop(state);
                self.shared.work_available.notify_one();
                Ok(id)
            }
            Some(JobState::Cancelled) => {
                state.mark_finished(id, JobState::Cancelled);
                Ok(id)
            }
            Some(_) => {
                state.states.insert(id, JobState::Pending);
                state.dependents.entry(dependency).or_default().push(job);
                Ok(id)
            }
        }
    }

    /// Registers a repeating job driven by [`JobScheduler::process_tick`].
    pub fn schedule_tick(
        &self,
        interval: Duration,
        work: impl Fn() + Send + Sync + 'static,
    ) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tick_jobs.lock().push(TickJob {
            id,
            interval,
            elapsed: Duration::ZERO,
            work: Arc::new(work),
        });
        id
    }

    /// Advances tick-job timers by `delta`, enqueueing any that are due.
    ///
    /// A tick job that falls behind by several intervals fires once per
    /// missed interval, same as a fixed-timestep accumulator.
    pub fn process_tick(&self, delta: Duration) {
        let mut due: Vec<Arc<dyn Fn() + Send + Sync>> = Vec::new();
        {
            let mut tick_jobs = self.tick_jobs.lock();
            for job in tick_jobs.iter_mut() {
                job.elapsed += delta;
                while job.elapsed >= job.interval {
                    job.elapsed -= job.interval;
                    due.push(job.work.clone());
                }
            }
        }
        for work in due {
            self.schedule(move || work(), JobPriority::Normal);
        }
    }

    /// Blocks until the job completes (or was cancelled).
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] when the job ID is unknown, including
    /// jobs that finished long enough ago to fall out of retention.
    pub fn wait(&self, id: JobId) -> CgsResult<()> {
        let mut state = self.shared.state.lock();
        loop {
            match state.states.get(&id) {
                None => return Err(CgsError::NotFound(format!("job {id}"))),
                Some(JobState::Completed) | Some(JobState::Cancelled) => return Ok(()),
                Some(_) => self.shared.job_finished.wait(&mut state),
            }
        }
    }

    /// Cancels a job that has not started yet. Jobs scheduled after it via
    /// [`JobScheduler::schedule_after`] are cancelled with it, transitively.
    ///
    /// Tick jobs may be cancelled at any time; one-shot jobs only while
    /// still pending.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] for unknown IDs and
    /// [`CgsError::InvalidArgument`] when the job is already running or done.
    pub fn cancel(&self, id: JobId) -> CgsResult<()> {
        {
            let mut tick_jobs = self.tick_jobs.lock();
            if let Some(pos) = tick_jobs.iter().position(|j| j.id == id) {
                tick_jobs.remove(pos);
                return Ok(());
            }
        }

        let mut state = self.shared.state.lock();
        match state.states.get(&id) {
            None => Err(CgsError::NotFound(format!("job {id}"))),
            Some(JobState::Pending) => {
                state.cancel_with_dependents(id);
                drop(state);
                self.shared.job_finished.notify_all();
                Ok(())
            }
            Some(_) => Err(CgsError::InvalidArgument(format!(
                "job {id} is already running or finished"
            ))),
        }
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs currently tracked, including retained finished ones.
    pub fn tracked_jobs(&self) -> usize {
        self.shared.state.lock().states.len()
    }

    fn make_job(
        &self,
        id: JobId,
        priority: JobPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> QueuedJob {
        let panic_tx = self.panic_tx.clone();
        let wrapped = Box::new(move || {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)).is_err() {
                let _ = panic_tx.send(format!("job {id} panicked"));
            }
        });
        QueuedJob {
            id,
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            work: wrapped,
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        while let Ok(msg) = self.panic_rx.try_recv() {
            warn!("{msg}");
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                shared.work_available.wait(&mut state);
            }
        };

        // A job cancelled after being queued is skipped, not run, and its
        // dependents are cancelled with it.
        {
            let mut state = shared.state.lock();
            match state.states.get(&job.id) {
                Some(JobState::Cancelled) => {
                    state.cancel_with_dependents(job.id);
                    drop(state);
                    shared.job_finished.notify_all();
                    continue;
                }
                _ => {
                    state.states.insert(job.id, JobState::Running);
                }
            }
        }

        (job.work)();

        let mut state = shared.state.lock();
        state.mark_finished(job.id, JobState::Completed);
        if let Some(dependents) = state.dependents.remove(&job.id) {
            for dependent in dependents {
                state.queue.push(dependent);
            }
            shared.work_available.notify_all();
        }
        drop(state);
        shared.job_finished.notify_all();
    }
}
