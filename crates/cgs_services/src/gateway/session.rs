//! Gateway session tracking.
//!
//! A session is the gateway-side record of one client connection. Sessions
//! start unauthenticated with a hard deadline to complete auth, move to
//! authenticated once the handshake binds a player, and may pass through a
//! migration window when handed between backend instances. A periodic
//! sweep evicts idle and auth-expired sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use cgs_foundation::error::{CgsError, CgsResult};
use cgs_foundation::types::{PlayerId, SessionId};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Migrating,
    Disconnecting,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub player: Option<PlayerId>,
    pub state: SessionState,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// Limits and timeouts for the session table.
#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    /// Hard cap on concurrent sessions.
    pub max_sessions: usize,
    /// Authenticated sessions idle longer than this are evicted.
    pub idle_timeout: Duration,
    /// Unauthenticated sessions must authenticate within this window.
    pub auth_timeout: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            idle_timeout: Duration::from_secs(300),
            auth_timeout: Duration::from_secs(30),
        }
    }
}

/// Bounded table of live gateway sessions.
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: DashMap<SessionId, Session>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a new unauthenticated session.
    ///
    /// # Errors
    /// Returns [`CgsError::ConnectionFailed`] when the table is full.
    pub fn open(&self) -> CgsResult<SessionId> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(CgsError::ConnectionFailed(
                "session limit reached".to_string(),
            ));
        }
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = Instant::now();
        self.sessions.insert(
            id,
            Session {
                id,
                player: None,
                state: SessionState::Unauthenticated,
                created_at: now,
                last_activity: now,
            },
        );
        Ok(id)
    }

    /// Binds a player to an unauthenticated session. A player may hold one
    /// session at a time; a second handshake is rejected until the first
    /// session closes or is swept.
    ///
    /// # Errors
    /// [`CgsError::SessionNotFound`] for unknown sessions,
    /// [`CgsError::InvalidArgument`] when the session is not awaiting auth,
    /// [`CgsError::AlreadyExists`] when the player is bound elsewhere.
    pub fn authenticate(&self, id: SessionId, player: PlayerId) -> CgsResult<()> {
        if let Some(existing) = self.session_for_player(player) {
            if existing != id {
                return Err(CgsError::AlreadyExists(format!(
                    "player {player} already bound to session {existing}"
                )));
            }
        }
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CgsError::SessionNotFound(id.to_string()))?;
        if session.state != SessionState::Unauthenticated {
            return Err(CgsError::InvalidArgument(format!(
                "{id} is not awaiting authentication"
            )));
        }
        session.player = Some(player);
        session.state = SessionState::Authenticated;
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Marks an authenticated session as migrating between backends.
    pub fn begin_migration(&self, id: SessionId) -> CgsResult<()> {
        self.transition(id, SessionState::Authenticated, SessionState::Migrating)
    }

    /// Completes a migration, returning the session to authenticated.
    pub fn complete_migration(&self, id: SessionId) -> CgsResult<()> {
        self.transition(id, SessionState::Migrating, SessionState::Authenticated)
    }

    /// Records activity on a session, resetting its idle clock.
    pub fn touch(&self, id: SessionId) -> CgsResult<()> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CgsError::SessionNotFound(id.to_string()))?;
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Closes a session and removes it from the table.
    pub fn close(&self, id: SessionId) -> CgsResult<Session> {
        let (_, mut session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| CgsError::SessionNotFound(id.to_string()))?;
        session.state = SessionState::Disconnecting;
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Finds the session currently bound to a player.
    pub fn session_for_player(&self, player: PlayerId) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|s| s.player == Some(player))
            .map(|s| s.id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evicts idle and auth-expired sessions. Returns the evicted IDs.
    /// Migrating sessions are exempt from the idle sweep.
    pub fn sweep(&self) -> Vec<SessionId> {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        self.sessions.retain(|id, session| {
            let keep = match session.state {
                SessionState::Unauthenticated => {
                    now.duration_since(session.created_at) < self.config.auth_timeout
                }
                SessionState::Authenticated => {
                    now.duration_since(session.last_activity) < self.config.idle_timeout
                }
                SessionState::Migrating => true,
                SessionState::Disconnecting => false,
            };
            if !keep {
                debug!(session = %id, state = ?session.state, "evicting session");
                evicted.push(*id);
            }
            keep
        });
        evicted
    }

    fn transition(&self, id: SessionId, from: SessionState, to: SessionState) -> CgsResult<()> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CgsError::SessionNotFound(id.to_string()))?;
        if session.state != from {
            return Err(CgsError::InvalidArgument(format!(
                "{id} is {:?}, expected {from:?}",
                session.state
            )));
        }
        session.state = to;
        session.last_activity = Instant::now();
        Ok(())
    }
}
