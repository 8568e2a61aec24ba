// ── lidlink Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the resolver, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, snapshot, transport, config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Correlation outcomes (ambiguity, rejected mappings) are NOT errors; they
//     are logged by the correlator and never surface through this enum.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Persisted snapshot is unreadable or violates an index invariant.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Transport (Evolution API / webhook) failure.
    #[error("Transport error: {context}: {message}")]
    Transport { context: String, message: String },

    /// A backfill fetch exceeded its per-context deadline.
    #[error("Timed out fetching {0}")]
    Timeout(String),

    /// Resolver configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input could not be parsed as a participant identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The resolver service is no longer accepting commands.
    #[error("Resolver service stopped")]
    ServiceStopped,

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a transport error for a context (group JID, endpoint, …).
    pub fn transport(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { context: context.into(), message: message.into() }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All resolver operations that can fail return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
