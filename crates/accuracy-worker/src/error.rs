//! Worker error types

use thiserror::Error;

/// Failures talking to an evaluation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Failed to launch engine: {0}")]
    Launch(String),

    /// The engine process went away (EOF, broken pipe, exit).
    #[error("Engine process died: {0}")]
    Terminated(String),

    #[error("Unexpected engine response: {0}")]
    Protocol(String),
}

impl OracleError {
    /// Only a dead engine process is handled by invalidating the game and moving on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OracleError::Terminated(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A stored game whose PGN no longer parses. Only that game is affected.
    #[error("Unreadable game {hexdigest}: {reason}")]
    UnreadableGame {
        hexdigest: String,
        white: String,
        black: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The game cannot be analyzed for this player (unknown player, illegal move, bad FEN).
    #[error("Invalid game {game}: {reason}")]
    InvalidGame { game: String, reason: String },

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        WorkerError::Store(StoreError::Database(err))
    }
}

impl WorkerError {
    pub fn invalid_game(game: &str, reason: impl Into<String>) -> Self {
        WorkerError::InvalidGame {
            game: game.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error should stop the whole run rather than skip one game.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WorkerError::InvalidGame { .. })
    }
}
