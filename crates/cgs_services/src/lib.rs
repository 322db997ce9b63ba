//! Backend services for the common game server framework.
//!
//! - [`gateway`] - Opcode routing, per-peer rate limiting, session table
//! - [`auth`] - Login rate limiting and opaque session tokens
//! - [`lobby`] - Elo ratings and matchmaking
//! - [`persist`] - Write-ahead log, snapshots, circuit breaker
//! - [`game_loop`] - Fixed-rate simulation thread with tick metrics
//! - [`query_cache`] - LRU + TTL cache of SELECT results
//! - [`health`] - Liveness, readiness, and metrics HTTP endpoint

pub mod auth;
pub mod game_loop;
pub mod gateway;
pub mod health;
pub mod lobby;
pub mod persist;
pub mod query_cache;

pub use auth::{AuthService, AuthToken, RateLimiter, TokenStore};
pub use game_loop::{GameLoop, GameLoopConfig, TickMetrics, DEFAULT_TICK_RATE_HZ};
pub use gateway::{RouteTable, SessionManager, SessionManagerConfig, SessionState, TokenBucket};
pub use health::HealthServer;
pub use lobby::{EloCalculator, MatchProposal, MatchmakingConfig, MatchmakingQueue};
pub use persist::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, SnapshotManager, WalRecord, WriteAheadLog,
};
pub use query_cache::{CacheStats, QueryCache, QueryCacheConfig, QueryResult};
