//! Error taxonomy for the game server framework.
//!
//! Errors are grouped by the subsystem that produces them, mirroring the
//! framework's layering: general, network, ECS, plugin, auth, config,
//! persistence, and service errors. [`CgsError::subsystem`] recovers the
//! producing subsystem for structured logging.

use thiserror::Error;

/// Result alias used across the framework.
pub type CgsResult<T> = Result<T, CgsError>;

/// Categorized errors for every framework subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CgsError {
    // -- General ------------------------------------------------------------
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A named resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A named resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    // -- Network ------------------------------------------------------------
    /// Failed to establish a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// An established connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// An operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Sending a message failed.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The referenced session is unknown to the gateway.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// A wire message could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    // -- ECS ----------------------------------------------------------------
    /// The entity handle is stale or was never created.
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    /// The entity does not have the requested component.
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    /// A system failed during scheduling or execution.
    #[error("system error: {0}")]
    SystemError(String),

    // -- Plugin -------------------------------------------------------------
    /// A plugin library could not be opened or its entry point resolved.
    #[error("plugin load failed: {0}")]
    PluginLoadFailed(String),
    /// The named plugin is not loaded.
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
    /// Plugin dependency resolution failed (missing, unsatisfied, or cyclic).
    #[error("plugin dependency error: {0}")]
    DependencyError(String),
    /// The plugin was built against an incompatible API version.
    #[error("plugin API version mismatch: {0}")]
    ApiVersionMismatch(String),

    // -- Auth ---------------------------------------------------------------
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The presented token has expired.
    #[error("token expired")]
    TokenExpired,
    /// The presented token is malformed, revoked, or unknown.
    #[error("invalid token")]
    InvalidToken,
    /// The caller lacks permission for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Too many attempts within the rate-limit window.
    #[error("rate limited: {0}")]
    RateLimited(String),

    // -- Config -------------------------------------------------------------
    /// The configuration file could not be read or parsed.
    #[error("config load failed: {0}")]
    ConfigLoadFailed(String),
    /// The requested dotted key does not exist.
    #[error("config key not found: {0}")]
    ConfigKeyNotFound(String),
    /// The value exists but cannot convert to the requested type.
    #[error("config type mismatch for key: {0}")]
    ConfigTypeMismatch(String),

    // -- Persistence --------------------------------------------------------
    /// A write-ahead-log frame failed its integrity check.
    #[error("WAL corrupt: {0}")]
    WalCorrupt(String),
    /// No snapshot is available to load.
    #[error("snapshot missing: {0}")]
    SnapshotMissing(String),
    /// Underlying filesystem I/O failed.
    #[error("persistence I/O error: {0}")]
    Io(String),

    // -- Service ------------------------------------------------------------
    /// The matchmaking queue is at capacity.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The player already has an active queue ticket.
    #[error("already queued: {0}")]
    AlreadyQueued(String),
    /// The circuit breaker is open and rejecting calls.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
}

impl CgsError {
    /// Returns the name of the subsystem that produced this error.
    pub fn subsystem(&self) -> &'static str {
        use CgsError::*;
        match self {
            InvalidArgument(_) | NotFound(_) | AlreadyExists(_) => "general",
            ConnectionFailed(_) | ConnectionLost(_) | Timeout(_) | SendFailed(_)
            | SessionNotFound(_) | InvalidMessage(_) => "network",
            EntityNotFound(_) | ComponentNotFound(_) | SystemError(_) => "ecs",
            PluginLoadFailed(_) | PluginNotFound(_) | DependencyError(_)
            | ApiVersionMismatch(_) => "plugin",
            AuthenticationFailed(_) | TokenExpired | InvalidToken | PermissionDenied(_)
            | RateLimited(_) => "auth",
            ConfigLoadFailed(_) | ConfigKeyNotFound(_) | ConfigTypeMismatch(_) => "config",
            WalCorrupt(_) | SnapshotMissing(_) | Io(_) => "persistence",
            QueueFull(_) | AlreadyQueued(_) | CircuitOpen(_) => "service",
        }
    }
}

impl From<std::io::Error> for CgsError {
    fn from(err: std::io::Error) -> Self {
        CgsError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_classification() {
        assert_eq!(CgsError::NotFound("x".into()).subsystem(), "general");
        assert_eq!(CgsError::Timeout("t".into()).subsystem(), "network");
        assert_eq!(CgsError::EntityNotFound("e".into()).subsystem(), "ecs");
        assert_eq!(CgsError::PluginNotFound("p".into()).subsystem(), "plugin");
        assert_eq!(CgsError::TokenExpired.subsystem(), "auth");
        assert_eq!(CgsError::ConfigKeyNotFound("k".into()).subsystem(), "config");
        assert_eq!(CgsError::WalCorrupt("w".into()).subsystem(), "persistence");
        assert_eq!(CgsError::QueueFull("q".into()).subsystem(), "service");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CgsError = io.into();
        assert_eq!(err.subsystem(), "persistence");
    }

    #[test]
    fn display_includes_detail() {
        let err = CgsError::ConfigKeyNotFound("server.port".into());
        assert!(err.to_string().contains("server.port"));
    }
}
