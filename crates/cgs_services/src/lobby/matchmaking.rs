//! Rating-based matchmaking queue with widening tolerance.
//!
//! Tickets wait in FIFO order. Matching scans anchors oldest-first and
//! gathers compatible tickets (same mode, compatible region, rating within
//! the pair's effective tolerance) until the match is full; a match forms
//! once the group reaches the configured minimum size. Tolerance starts
//! tight and widens by a fixed step at a fixed interval while a ticket
//! waits, up to a cap, so nobody queues forever.

use std::time::{Duration, Instant};

use cgs_foundation::error::{CgsError, CgsResult};
use cgs_foundation::types::PlayerId;

use super::elo::EloCalculator;

/// Region wildcard accepted by any ticket.
pub const REGION_ANY: &str = "any";

/// Queue tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct MatchmakingConfig {
    /// Rating tolerance for a freshly queued ticket.
    pub initial_tolerance: f64,
    /// Tolerance added per expansion interval of waiting.
    pub expansion_step: f64,
    /// How often a waiting ticket's tolerance widens.
    pub expansion_interval: Duration,
    /// Upper bound on tolerance.
    pub max_tolerance: f64,
    /// Fewest players that form a match.
    pub min_players: usize,
    /// Most players a single match takes.
    pub max_players: usize,
    /// Hard cap on queued tickets.
    pub capacity: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            initial_tolerance: 50.0,
            expansion_step: 25.0,
            expansion_interval: Duration::from_secs(10),
            max_tolerance: 400.0,
            min_players: 2,
            max_players: 2,
            capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct Ticket {
    player: PlayerId,
    rating: f64,
    mode: String,
    region: String,
    enqueued_at: Instant,
}

/// A proposed match produced by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchProposal {
    pub mode: String,
    pub players: Vec<PlayerId>,
    pub ratings: Vec<f64>,
    /// Mean rating of the matched group.
    pub average_rating: f64,
    /// Elo-derived quality in `[0, 1]`.
    pub quality: f64,
}

/// FIFO matchmaking queue.
pub struct MatchmakingQueue {
    config: MatchmakingConfig,
    tickets: Vec<Ticket>,
}

impl MatchmakingQueue {
    pub fn new(config: MatchmakingConfig) -> Self {
        Self {
            config,
            tickets: Vec::new(),
        }
    }

    /// Queues a player.
    ///
    /// # Errors
    /// [`CgsError::AlreadyQueued`] when the player has a live ticket,
    /// [`CgsError::QueueFull`] at capacity.
    pub fn enqueue(
        &mut self,
        player: PlayerId,
        rating: f64,
        mode: &str,
        region: &str,
    ) -> CgsResult<()> {
        if self.tickets.iter().any(|t| t.player == player) {
            return Err(CgsError::AlreadyQueued(player.to_string()));
        }
        if self.tickets.len() >= self.config.capacity {
            return Err(CgsError::QueueFull(format!(
                "matchmaking queue at {} tickets",
                self.config.capacity
            )));
        }
        self.tickets.push(Ticket {
            player,
            rating,
            mode: mode.to_string(),
            region: region.to_string(),
            enqueued_at: Instant::now(),
        });
        Ok(())
    }

    /// Withdraws a player's ticket.
    ///
    /// # Errors
    /// Returns [`CgsError::NotFound`] when the player is not queued.
    pub fn dequeue(&mut self, player: PlayerId) -> CgsResult<()> {
        let pos = self
            .tickets
            .iter()
            .position(|t| t.player == player)
            .ok_or_else(|| CgsError::NotFound(player.to_string()))?;
        self.tickets.remove(pos);
        Ok(())
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.tickets.iter().any(|t| t.player == player)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Runs one matching pass, removing matched tickets from the queue.
    pub fn try_match(&mut self) -> Vec<MatchProposal> {
        self.match_at(Instant::now())
    }

    fn match_at(&mut self, now: Instant) -> Vec<MatchProposal> {
        let mut matched = vec![false; self.tickets.len()];
        let mut proposals = Vec::new();

        for anchor in 0..self.tickets.len() {
            if matched[anchor] {
                continue;
            }
            let anchor_tolerance = self.effective_tolerance(&self.tickets[anchor], now);
            let mut group = vec![anchor];
            for candidate in 0..self.tickets.len() {
                if candidate == anchor || matched[candidate] {
                    continue;
                }
                let (a, c) = (&self.tickets[anchor], &self.tickets[candidate]);
                if a.mode != c.mode || !regions_compatible(&a.region, &c.region) {
                    continue;
                }
                // The more patient ticket's widened tolerance applies.
                let tolerance = anchor_tolerance.max(self.effective_tolerance(c, now));
                if (a.rating - c.rating).abs() > tolerance {
                    continue;
                }
                group.push(candidate);
                if group.len() >= self.config.max_players {
                    break;
                }
            }
            if group.len() < self.config.min_players {
                continue;
            }

            let ratings: Vec<f64> = group.iter().map(|&i| self.tickets[i].rating).collect();
            let average_rating = ratings.iter().sum::<f64>() / ratings.len() as f64;
            proposals.push(MatchProposal {
                mode: self.tickets[anchor].mode.clone(),
                players: group.iter().map(|&i| self.tickets[i].player).collect(),
                average_rating,
                quality: EloCalculator::match_quality(&ratings),
                ratings,
            });
            for &i in &group {
                matched[i] = true;
            }
        }

        let mut index = 0;
        self.tickets.retain(|_| {
            let keep = !matched[index];
            index += 1;
            keep
        });
        proposals
    }

    fn effective_tolerance(&self, ticket: &Ticket, now: Instant) -> f64 {
        let waited = now.saturating_duration_since(ticket.enqueued_at);
        let expansions = if self.config.expansion_interval.is_zero() {
            0
        } else {
            (waited.as_secs_f64() / self.config.expansion_interval.as_secs_f64()) as u32
        };
        (self.config.initial_tolerance + self.config.expansion_step * f64::from(expansions))
            .min(self.config.max_tolerance)
    }
}

fn regions_compatible(a: &str, b: &str) -> bool {
    a == b || a == REGION_ANY || b == REGION_ANY
}
