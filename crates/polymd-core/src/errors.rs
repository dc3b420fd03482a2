//! Error types for polymd.

use thiserror::Error;

/// Unified error type for all polymd operations.
///
/// Provides structured, actionable error messages with context.
#[derive(Error, Debug)]
pub enum PolymdError {
    /// Configuration validation errors (bad XML/ASCII fields, unknown writers)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Phase-space input errors (unreadable file, malformed molecule record)
    #[error("Phase-space error: {0}")]
    PhaseSpace(String),

    /// Mathematical/numerical errors (e.g. NaN in force accumulators)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Non-blocking exchange failed to converge within the deadlock timeout
    #[error("Communication deadlock on rank {rank}: {message}")]
    CommunicationDeadlock { rank: usize, message: String },

    /// Other communication failures (disconnected peer, bad packet)
    #[error("Communication error: {0}")]
    Communication(String),

    /// I/O errors (file reading, checkpoint writing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors (fallback)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PolymdError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PolymdError::Config(message.into())
    }

    /// Creates a phase-space error.
    pub fn phase_space(message: impl Into<String>) -> Self {
        PolymdError::PhaseSpace(message.into())
    }

    /// Creates a numerical error.
    pub fn numerical(message: impl Into<String>) -> Self {
        PolymdError::Numerical(message.into())
    }

    /// Creates a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        PolymdError::Communication(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        PolymdError::Internal(message.into())
    }

    /// Process exit code for the CLI. Startup errors exit 1; a deadlocked
    /// exchange exits with a distinguished code so batch systems can tell
    /// the two apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            PolymdError::CommunicationDeadlock { .. } => DEADLOCK_EXIT_CODE,
            _ => 1,
        }
    }
}

/// Exit code raised when the exchange deadlock guard fires.
pub const DEADLOCK_EXIT_CODE: i32 = 457;

/// Result type alias for polymd operations.
pub type Result<T> = std::result::Result<T, PolymdError>;
