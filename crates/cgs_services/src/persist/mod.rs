//! Persistence services: write-ahead logging, snapshots, and a circuit
//! breaker for downstream stores.

pub mod circuit_breaker;
pub mod snapshot;
pub mod wal;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use snapshot::SnapshotManager;
pub use wal::{WalRecord, WriteAheadLog};
