//! Lobby services: Elo ratings and matchmaking.

pub mod elo;
pub mod matchmaking;

pub use elo::EloCalculator;
pub use matchmaking::{MatchProposal, MatchmakingConfig, MatchmakingQueue, REGION_ANY};
