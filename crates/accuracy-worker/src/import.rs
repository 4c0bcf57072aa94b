//! Loading games from PGN text into the game store

use chess_core::pgn::{parse_pgn, split_games};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::GameStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Same PGN text already stored
    pub duplicates: usize,
    /// Missing player headers or no moves
    pub rejected: usize,
}

/// Insert every game in a multi-game PGN text, skipping ones already stored.
pub async fn import_pgn<G: GameStore + ?Sized>(games: &G, text: &str) -> Result<ImportSummary, StoreError> {
    let mut summary = ImportSummary::default();

    for (index, pgn) in split_games(text).iter().enumerate() {
        let game = match parse_pgn(pgn) {
            Ok(game) => game,
            Err(e) => {
                warn!(index, error = %e, "Rejected PGN game");
                summary.rejected += 1;
                continue;
            }
        };
        if games.insert_game(&game).await? {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        rejected = summary.rejected,
        "PGN import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryGameStore;
    use crate::filter::GameFilter;

    const TWO_GAMES: &str = r#"[Event "Casual"]
[White "alice"]
[Black "bob"]
[Result "1-0"]

1. e4 e5 2. Qh5 Nc6 3. Bc4 Nf6 4. Qxf7# 1-0

[Event "Casual"]
[White "bob"]
[Black "alice"]
[Result "0-1"]

1. f3 e5 2. g4 Qh4# 0-1
"#;

    #[tokio::test]
    async fn test_import_dedups_by_hash() {
        let store = MemoryGameStore::default();
        let first = import_pgn(&store, TWO_GAMES).await.unwrap();
        assert_eq!(first.inserted, 2);

        let again = import_pgn(&store, TWO_GAMES).await.unwrap();
        assert_eq!(again, ImportSummary { inserted: 0, duplicates: 2, rejected: 0 });
        assert_eq!(store.count(&GameFilter::for_user("ALICE")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_game_without_players_is_rejected() {
        let store = MemoryGameStore::default();
        let summary = import_pgn(&store, "[Event \"x\"]\n\n1. e4 e5 *\n").await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.inserted, 0);
    }
}
