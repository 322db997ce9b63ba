//! Authentication: login rate limiting and opaque session tokens.
//!
//! Tokens are opaque UUIDs held server-side with a TTL; revocation moves a
//! token to a blacklist until it would have expired anyway, so a stolen
//! token cannot be replayed after logout. Login attempts are rate limited
//! per username with a sliding window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use cgs_foundation::error::{CgsError, CgsResult};
use cgs_foundation::types::PlayerId;

/// Sliding-window attempt limiter, keyed by an arbitrary string.
pub struct RateLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `key`.
    ///
    /// # Errors
    /// Returns [`CgsError::RateLimited`] when the window is already full;
    /// the rejected attempt is not recorded.
    pub fn check(&self, key: &str) -> CgsResult<()> {
        self.check_at(key, Instant::now())
    }

    /// Attempts left in the current window for `key`.
    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let Some(window) = attempts.get_mut(key) else {
            return self.max_attempts;
        };
        prune(window, now, self.window);
        self.max_attempts.saturating_sub(window.len())
    }

    /// Clears recorded attempts for `key`, e.g. after a successful login.
    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    fn check_at(&self, key: &str, now: Instant) -> CgsResult<()> {
        let mut attempts = self.attempts.lock();
        let window = attempts.entry(key.to_string()).or_default();
        prune(window, now, self.window);
        if window.len() >= self.max_attempts {
            return Err(CgsError::RateLimited(key.to_string()));
        }
        window.push_back(now);
        Ok(())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(&oldest) = window.front() {
        if now.duration_since(oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// An issued session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub player: PlayerId,
}

struct TokenEntry {
    player: PlayerId,
    expires_at: Instant,
}

/// Server-side store of opaque session tokens with TTL and revocation.
pub struct TokenStore {
    ttl: Duration,
    tokens: DashMap<String, TokenEntry>,
    blacklist: DashMap<String, Instant>,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: DashMap::new(),
            blacklist: DashMap::new(),
        }
    }

    /// Issues a fresh token for a player.
    pub fn issue(&self, player: PlayerId) -> AuthToken {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                player,
                expires_at: Instant::now() + self.ttl,
            },
        );
        AuthToken { token, player }
    }

    /// Resolves a token to its player.
    ///
    /// # Errors
    /// [`CgsError::InvalidToken`] for unknown or revoked tokens,
    /// [`CgsError::TokenExpired`] past the TTL (the token is dropped).
    pub fn validate(&self, token: &str) -> CgsResult<PlayerId> {
        if self.blacklist.contains_key(token) {
            return Err(CgsError::InvalidToken);
        }
        let entry = self.tokens.get(token).ok_or(CgsError::InvalidToken)?;
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.tokens.remove(token);
            return Err(CgsError::TokenExpired);
        }
        Ok(entry.player)
    }

    /// Revokes a token. Blacklisted until its natural expiry.
    pub fn revoke(&self, token: &str) {
        let until = self
            .tokens
            .remove(token)
            .map(|(_, e)| e.expires_at)
            .unwrap_or_else(|| Instant::now() + self.ttl);
        self.blacklist.insert(token.to_string(), until);
    }

    /// Drops expired tokens and spent blacklist entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, e| e.expires_at > now);
        self.blacklist.retain(|_, until| *until > now);
    }

    pub fn active_tokens(&self) -> usize {
        self.tokens.len()
    }
}

/// Checks a username/password pair, yielding the player on success.
pub type CredentialValidator = Box<dyn Fn(&str, &str) -> Option<PlayerId> + Send + Sync>;

/// Login front door combining rate limiting, credential checks, and
/// token issuance.
pub struct AuthService {
    limiter: RateLimiter,
    tokens: TokenStore,
    validator: CredentialValidator,
}

impl AuthService {
    pub fn new(limiter: RateLimiter, tokens: TokenStore, validator: CredentialValidator) -> Self {
        Self {
            limiter,
            tokens,
            validator,
        }
    }

    /// Authenticates and issues a token.
    ///
    /// # Errors
    /// [`CgsError::RateLimited`] when the username has too many recent
    /// attempts (failed or not), [`CgsError::AuthenticationFailed`] on bad
    /// credentials.
    pub fn login(&self, username: &str, password: &str) -> CgsResult<AuthToken> {
        self.limiter.check(username)?;
        let player = (self.validator)(username, password)
            .ok_or_else(|| CgsError::AuthenticationFailed(username.to_string()))?;
        self.limiter.reset(username);
        info!(player = %player, "login succeeded");
        Ok(self.tokens.issue(player))
    }

    /// Resolves a token to its player.
    pub fn validate(&self, token: &str) -> CgsResult<PlayerId> {
        self.tokens.validate(token)
    }

    /// Revokes a token.
    pub fn logout(&self, token: &str) {
        self.tokens.revoke(token);
    }
}
