//! Stored accuracy grouped by the piece that moved

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chess::Piece;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{StoreError, WorkerError};
use crate::filter::GameFilter;
use crate::replay::replay;
use crate::store::{CacheStore, GameStore};

/// Piece kinds in board order, pawn first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl From<Piece> for PieceKind {
    fn from(piece: Piece) -> Self {
        match piece {
            Piece::Pawn => PieceKind::Pawn,
            Piece::Knight => PieceKind::Knight,
            Piece::Bishop => PieceKind::Bishop,
            Piece::Rook => PieceKind::Rook,
            Piece::Queen => PieceKind::Queen,
            Piece::King => PieceKind::King,
        }
    }
}

impl PieceKind {
    pub fn name(self) -> &'static str {
        match self {
            PieceKind::Pawn => "Pawn",
            PieceKind::Knight => "Knight",
            PieceKind::Bishop => "Bishop",
            PieceKind::Rook => "Rook",
            PieceKind::Queen => "Queen",
            PieceKind::King => "King",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PieceTotals {
    pub moves: usize,
    pub sum: f64,
}

impl PieceTotals {
    pub fn average(&self) -> Option<f64> {
        (self.moves > 0).then(|| self.sum / self.moves as f64)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PieceSummary {
    pub username: String,
    /// Games with a stored sequence that contributed moves
    pub games: usize,
    /// Matching games with no stored sequence or an unusable one
    pub skipped: usize,
    pub pieces: BTreeMap<PieceKind, PieceTotals>,
}

impl PieceSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Games with stored accuracy: {}", self.games);
        if self.skipped > 0 {
            let _ = writeln!(out, "Games skipped: {}", self.skipped);
        }
        for (piece, totals) in &self.pieces {
            if let Some(average) = totals.average() {
                let _ = writeln!(
                    out,
                    "{}: {:.2}% ({} moves)",
                    piece.name(),
                    average * 100.0,
                    totals.moves
                );
            }
        }
        out
    }
}

/// Average stored move accuracy per moving piece over every matching game.
///
/// Only sequences persisted by earlier accuracy runs are read; games without
/// one are counted as skipped. No engine is involved.
pub async fn accuracy_per_piece<C, G>(
    cache: &C,
    games: &G,
    filter: &GameFilter,
    schema_version: i32,
) -> Result<PieceSummary, WorkerError>
where
    C: CacheStore + ?Sized,
    G: GameStore + ?Sized,
{
    let player = filter.username.to_lowercase();
    let mut summary = PieceSummary {
        username: filter.username.clone(),
        ..Default::default()
    };

    let mut stream = games.stream(filter);
    while let Some(game) = stream.next().await {
        let game = match game {
            Ok(game) => game,
            Err(StoreError::UnreadableGame { hexdigest, reason, .. }) => {
                warn!(game = %hexdigest, reason = %reason, "Skipping unreadable game");
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let Some(sequence) = cache
            .get_accuracy(&game.hexdigest, &player, schema_version)
            .await?
        else {
            debug!(game = %game.hexdigest, "No stored accuracy");
            summary.skipped += 1;
            continue;
        };
        let Some(side) = game.metadata.player_side(&filter.username) else {
            summary.skipped += 1;
            continue;
        };
        let plies = match replay(&game) {
            Ok(plies) => plies,
            Err(reason) => {
                warn!(game = %game.hexdigest, reason = %reason, "Stored game no longer replays");
                summary.skipped += 1;
                continue;
            }
        };

        let moved: Vec<PieceKind> = plies
            .iter()
            .filter(|ply| ply.mover() == side)
            .filter_map(|ply| ply.board.piece_on(ply.played.get_source()))
            .map(PieceKind::from)
            .collect();
        if moved.len() != sequence.len() {
            warn!(
                game = %game.hexdigest,
                moves = moved.len(),
                stored = sequence.len(),
                "Stored sequence does not match the game"
            );
            summary.skipped += 1;
            continue;
        }

        for (piece, accuracy) in moved.into_iter().zip(sequence) {
            let totals = summary.pieces.entry(piece).or_default();
            totals.moves += 1;
            totals.sum += accuracy;
        }
        summary.games += 1;
    }

    info!(
        username = %summary.username,
        games = summary.games,
        skipped = summary.skipped,
        "Per-piece accuracy computed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chess_core::{GameMetadata, GameRecord};

    use super::*;
    use crate::fakes::{MemoryCacheStore, MemoryGameStore};

    fn game(hexdigest: &str, moves: &[&str]) -> GameRecord {
        GameRecord {
            hexdigest: hexdigest.to_string(),
            metadata: GameMetadata {
                white: "Alice".to_string(),
                black: "bob".to_string(),
                result: "*".to_string(),
                ..Default::default()
            },
            moves: moves.iter().map(|m| m.to_string()).collect(),
            pgn: String::new(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_groups_stored_sequence_by_moving_piece() {
        let games = MemoryGameStore::new(vec![
            game("g1", &["e4", "e5", "Nf3", "Nc6", "Bb5"]),
            game("g2", &["d4", "d5", "Nf3"]),
            game("g3", &["c4"]),
        ]);
        let cache = Arc::new(MemoryCacheStore::new());
        cache.put_accuracy("g1", "alice", 1, &[1.0, 0.5, 0.25]).await.unwrap();
        cache.put_accuracy("g2", "alice", 1, &[0.5, 0.75]).await.unwrap();

        let summary = accuracy_per_piece(cache.as_ref(), &games, &GameFilter::for_user("ALICE"), 1)
            .await
            .unwrap();

        assert_eq!(summary.games, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pieces[&PieceKind::Pawn], PieceTotals { moves: 2, sum: 1.5 });
        assert_eq!(summary.pieces[&PieceKind::Knight], PieceTotals { moves: 2, sum: 1.25 });
        assert_eq!(summary.pieces[&PieceKind::Bishop], PieceTotals { moves: 1, sum: 0.25 });
        assert!(!summary.pieces.contains_key(&PieceKind::King));

        let text = summary.render();
        assert!(text.contains("Pawn: 75.00% (2 moves)"));
        assert!(text.contains("Knight: 62.50% (2 moves)"));
        assert!(text.contains("Games skipped: 1"));
    }

    #[tokio::test]
    async fn test_mismatched_sequence_is_skipped() {
        let games = MemoryGameStore::new(vec![game("g1", &["e4", "e5", "Nf3"])]);
        let cache = MemoryCacheStore::new();
        cache.put_accuracy("g1", "alice", 1, &[1.0]).await.unwrap();

        let summary = accuracy_per_piece(&cache, &games, &GameFilter::for_user("alice"), 1)
            .await
            .unwrap();
        assert_eq!(summary.games, 0);
        assert_eq!(summary.skipped, 1);
        assert!(summary.pieces.is_empty());
    }

    #[tokio::test]
    async fn test_black_moves_use_black_pieces() {
        let games = MemoryGameStore::new(vec![game("g1", &["e4", "Nf6", "e5", "Nd5", "d4", "e6"])]);
        let cache = MemoryCacheStore::new();
        cache.put_accuracy("g1", "bob", 1, &[0.5, 1.0, 0.25]).await.unwrap();

        let summary = accuracy_per_piece(&cache, &games, &GameFilter::for_user("Bob"), 1)
            .await
            .unwrap();
        assert_eq!(summary.pieces[&PieceKind::Knight], PieceTotals { moves: 2, sum: 1.5 });
        assert_eq!(summary.pieces[&PieceKind::Pawn], PieceTotals { moves: 1, sum: 0.25 });
    }
}
