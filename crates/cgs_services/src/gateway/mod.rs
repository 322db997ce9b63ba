//! Gateway-side services: opcode routing, per-peer rate limiting, and
//! session tracking.

pub mod route_table;
pub mod session;
pub mod token_bucket;

pub use route_table::{
    RouteTable, OP_AUTH_HANDSHAKE, OP_DISCONNECT, OP_GATEWAY_NOTICE, OP_HEARTBEAT,
};
pub use session::{Session, SessionManager, SessionManagerConfig, SessionState};
pub use token_bucket::{TokenBucket, TokenBucketConfig};
