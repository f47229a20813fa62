//! Error types for the crate.
//!
//! Uses thiserror for ergonomic error definition. Only interpreter and
//! journal failures are fatal to a game; everything else is recovered
//! locally and logged.

use std::time::Duration;

/// Errors from language-model calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// API error from the provider
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/connection error
    #[error("Network error: {0}")]
    Network(String),

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request timed out
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Structured output failed schema validation even after retries
    #[error("Schema validation failed after {attempts} attempts: {message}")]
    SchemaValidation { attempts: u32, message: String },
}

/// Errors from the Z-Machine interpreter collaborator. All of these are
/// fatal to the running game.
#[derive(Debug, thiserror::Error)]
pub enum InterpreterError {
    /// Reading from or writing to the interpreter process failed
    #[error("Interpreter I/O failed: {0}")]
    Io(String),

    /// The interpreter process is gone
    #[error("Interpreter process exited")]
    ProcessExited,

    /// Interpreter did not respond in time
    #[error("Interpreter timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Save failed
    #[error("Save to slot {slot} failed: {reason}")]
    SaveFailed { slot: u32, reason: String },

    /// Restore failed
    #[error("Restore from slot {slot} failed: {reason}")]
    RestoreFailed { slot: u32, reason: String },
}

/// Errors from the durable journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Underlying SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced game does not exist
    #[error("No game with id {0}")]
    UnknownGame(i64),
}

/// Top-level error for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// LLM collaborator error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Interpreter collaborator error
    #[error("Interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),

    /// Journal error
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for LLM operations
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Result type for interpreter operations
pub type InterpreterResult<T> = std::result::Result<T, InterpreterError>;

/// Result type for journal operations
pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Result type for orchestrator operations
pub type GameResult<T> = std::result::Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LlmError::Configuration("no api key".to_string());
        assert_eq!(err.to_string(), "Configuration error: no api key");
    }

    #[test]
    fn test_error_conversion() {
        let llm_err = LlmError::Parse("bad json".to_string());
        let err: GameError = llm_err.into();
        assert!(matches!(err, GameError::Llm(_)));
    }
}
