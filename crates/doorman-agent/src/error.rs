//! Agent runtime error types.

use std::fmt;

use doorman_core::SchemaError;

/// Errors that can occur in the agent runtime.
#[derive(Debug)]
pub enum AgentError {
    /// Configuration error (invalid bind address, unknown uberdog class,
    /// malformed TOML, etc.).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, socket I/O error).
    ///
    /// May be transient (peer went away) or fatal (address in use).
    Transport(String),

    /// Internal error (unexpected state, logic bug).
    ///
    /// Should never happen; indicates a bug in the agent itself.
    Internal(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<SchemaError> for AgentError {
    fn from(err: SchemaError) -> Self {
        Self::Config(err.to_string())
    }
}
