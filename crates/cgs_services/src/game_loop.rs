//! Fixed-rate game loop on a dedicated thread.
//!
//! Runs a callback at a configured tick rate (default 20 Hz). Each tick is
//! timed against its budget; overruns are logged and surfaced through
//! [`TickMetrics`] so operators can see a loop that cannot keep up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use cgs_foundation::error::{CgsError, CgsResult};

/// Default simulation rate.
pub const DEFAULT_TICK_RATE_HZ: u32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct GameLoopConfig {
    pub tick_rate_hz: u32,
}

impl Default for GameLoopConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
        }
    }
}

/// Timing of the most recent tick.
#[derive(Debug, Clone, Copy)]
pub struct TickMetrics {
    pub tick: u64,
    pub duration: Duration,
    pub budget: Duration,
    pub overrun: bool,
    /// `duration / budget`; above 1.0 the loop is falling behind.
    pub budget_utilization: f64,
}

/// Handle to a running game loop thread.
pub struct GameLoop {
    running: Arc<AtomicBool>,
    tick_count: Arc<AtomicU64>,
    last_metrics: Arc<Mutex<Option<TickMetrics>>>,
    handle: Option<JoinHandle<()>>,
}

impl GameLoop {
    /// Spawns the loop thread. The callback receives the tick number and
    /// the tick budget in seconds.
    ///
    /// # Errors
    /// Returns [`CgsError::InvalidArgument`] for a zero tick rate.
    pub fn start(
        config: GameLoopConfig,
        mut on_tick: impl FnMut(u64, f32) + Send + 'static,
    ) -> CgsResult<Self> {
        if config.tick_rate_hz == 0 {
            return Err(CgsError::InvalidArgument(
                "tick rate must be positive".to_string(),
            ));
        }
        let budget = Duration::from_secs_f64(1.0 / f64::from(config.tick_rate_hz));
        let dt = budget.as_secs_f32();

        let running = Arc::new(AtomicBool::new(true));
        let tick_count = Arc::new(AtomicU64::new(0));
        let last_metrics: Arc<Mutex<Option<TickMetrics>>> = Arc::new(Mutex::new(None));

        let thread_running = running.clone();
        let thread_ticks = tick_count.clone();
        let thread_metrics = last_metrics.clone();

        let handle = std::thread::Builder::new()
            .name("cgs-game-loop".to_string())
            .spawn(move || {
                info!(hz = config.tick_rate_hz, "game loop started");
                while thread_running.load(Ordering::Relaxed) {
                    let tick = thread_ticks.fetch_add(1, Ordering::Relaxed);
                    let started = Instant::now();
                    on_tick(tick, dt);
                    let duration = started.elapsed();

                    let overrun = duration > budget;
                    let metrics = TickMetrics {
                        tick,
                        duration,
                        budget,
                        overrun,
                        budget_utilization: duration.as_secs_f64() / budget.as_secs_f64(),
                    };
                    *thread_metrics.lock() = Some(metrics);

                    if overrun {
                        warn!(
                            tick,
                            duration_ms = duration.as_millis() as u64,
                            budget_ms = budget.as_millis() as u64,
                            "tick overran its budget"
                        );
                    } else {
                        std::thread::sleep(budget - duration);
                    }
                }
                info!("game loop stopped");
            })
            .map_err(|e| CgsError::SystemError(format!("failed to spawn game loop: {e}")))?;

        Ok(Self {
            running,
            tick_count,
            last_metrics,
            handle: Some(handle),
        })
    }

    /// Signals the loop to stop and waits for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.handle.is_some()
    }

    /// Ticks executed (or in progress) so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Timing of the most recently completed tick.
    pub fn last_metrics(&self) -> Option<TickMetrics> {
        *self.last_metrics.lock()
    }
}

impl Drop for GameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ticks_advance_and_stop() {
        let counted = Arc::new(AtomicUsize::new(0));
        let counted_clone = counted.clone();
        let mut game_loop = GameLoop::start(
            GameLoopConfig { tick_rate_hz: 100 },
            move |_tick, dt| {
                assert!((dt - 0.01).abs() < 1e-6);
                counted_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        game_loop.stop();
        let after_stop = counted.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected a few ticks, got {after_stop}");
        assert!(!game_loop.is_running());

        // No ticks after stop.
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(counted.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn metrics_report_overruns() {
        let mut game_loop = GameLoop::start(
            GameLoopConfig { tick_rate_hz: 200 },
            |_tick, _dt| {
                std::thread::sleep(Duration::from_millis(20));
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        game_loop.stop();

        let metrics = game_loop.last_metrics().unwrap();
        assert!(metrics.overrun);
        assert!(metrics.budget_utilization > 1.0);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            GameLoop::start(GameLoopConfig { tick_rate_hz: 0 }, |_, _| {}),
            Err(CgsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn drop_stops_the_thread() {
        let counted = Arc::new(AtomicUsize::new(0));
        let counted_clone = counted.clone();
        {
            let _game_loop = GameLoop::start(
                GameLoopConfig { tick_rate_hz: 100 },
                move |_, _| {
                    counted_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();
            std::thread::sleep(Duration::from_millis(30));
        }
        let after_drop = counted.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(counted.load(Ordering::SeqCst), after_drop);
    }
}
