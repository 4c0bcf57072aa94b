//! Persistence seams for games, evaluations and accuracy sequences.
//!
//! `db::PgStore` implements both traits against Postgres; `fakes` has
//! in-memory versions for tests.

use async_trait::async_trait;
use chess_core::GameRecord;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::filter::GameFilter;
use crate::score::EvaluationValue;

/// Analysis type recorded in invalid flags and game tags.
pub const ACCURACY_ANALYSIS: &str = "accuracy";

/// Cache key for one candidate move in one position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvaluationKey {
    pub fen: String,
    pub candidate: String,
    pub schema_version: i32,
}

impl EvaluationKey {
    pub fn new(fen: &str, candidate: &str, schema_version: i32) -> Self {
        Self {
            fen: normalize_fen(fen),
            candidate: candidate.to_string(),
            schema_version,
        }
    }
}

/// Strips move counters from FEN, keeping only position + side + castling + ep.
pub fn normalize_fen(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Result of a write-once insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// Same value was already stored
    AlreadyPresent,
    /// A different value was already stored; it was kept
    Conflict { existing: EvaluationValue },
}

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get_evaluation(&self, key: &EvaluationKey) -> Result<Option<EvaluationValue>, StoreError>;

    async fn put_evaluation(
        &self,
        key: &EvaluationKey,
        value: EvaluationValue,
    ) -> Result<PutOutcome, StoreError>;

    async fn get_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
    ) -> Result<Option<Vec<f64>>, StoreError>;

    /// Returns false when a sequence was already stored for this key.
    async fn put_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
        sequence: &[f64],
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait GameStore: Send + Sync + 'static {
    /// Number of games `stream` will yield for this filter.
    async fn count(&self, filter: &GameFilter) -> Result<u64, StoreError>;

    /// Lazily yields matching games. Order is not stable across calls.
    /// A game that cannot be read is yielded as `StoreError::UnreadableGame`
    /// and the stream carries on; any other error ends it.
    fn stream<'a>(&'a self, filter: &'a GameFilter) -> BoxStream<'a, Result<GameRecord, StoreError>>;

    /// Returns false when a game with the same hash is already stored.
    async fn insert_game(&self, game: &GameRecord) -> Result<bool, StoreError>;

    async fn mark_invalid(&self, hexdigest: &str, analysis: &str) -> Result<(), StoreError>;

    /// Clear `analysis` invalid flags on `username`'s games. Returns how many were cleared.
    async fn clear_invalid(&self, username: &str, analysis: &str) -> Result<u64, StoreError>;

    async fn add_tag(&self, hexdigest: &str, tag: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_move_counters() {
        let a = EvaluationKey::new("8/8/8/8/8/8/8/K6k w - - 0 1", "a1a2", 1);
        let b = EvaluationKey::new("8/8/8/8/8/8/8/K6k w - - 12 40", "a1a2", 1);
        assert_eq!(a, b);
        assert_eq!(a.fen, "8/8/8/8/8/8/8/K6k w - -");
        assert_ne!(a, EvaluationKey::new("8/8/8/8/8/8/8/K6k w - - 0 1", "a1a2", 2));
    }
}
