#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use accuracy_worker::accuracy::AnalysisContext;
use accuracy_worker::arbiter::ResourceArbiter;
use accuracy_worker::fakes::{MemoryCacheStore, MemoryGameStore, ScriptedLauncher};
use accuracy_worker::filter::GameFilter;
use accuracy_worker::oracle::EngineSpec;
use accuracy_worker::scheduler::{AnalysisRequest, PlayerSelection};
use accuracy_worker::store::ACCURACY_ANALYSIS;
use chess::{Board, MoveGen, Piece};
use chess_core::{GameMetadata, GameRecord};

pub type TestContext = AnalysisContext<MemoryCacheStore, MemoryGameStore, ScriptedLauncher>;

/// Fully disambiguated SAN ("Ng1f3", "e2e4", "Ke1g1"), which the replayer accepts.
fn long_san(board: &Board, m: chess::ChessMove) -> String {
    let piece = match board.piece_on(m.get_source()) {
        Some(Piece::King) => "K",
        Some(Piece::Queen) => "Q",
        Some(Piece::Rook) => "R",
        Some(Piece::Bishop) => "B",
        Some(Piece::Knight) => "N",
        _ => "",
    };
    let promotion = match m.get_promotion() {
        Some(Piece::Queen) => "=Q",
        Some(Piece::Rook) => "=R",
        Some(Piece::Bishop) => "=B",
        Some(Piece::Knight) => "=N",
        _ => "",
    };
    format!("{piece}{}{}{promotion}", m.get_source(), m.get_dest())
}

/// A legal game of `plies` half-moves that never repeats a position and never ends early.
pub fn generated_game(hexdigest: &str, white: &str, black: &str, plies: usize, seed: u64) -> GameRecord {
    let mut board = Board::default();
    let mut seen = HashSet::from([board.get_hash()]);
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut moves = Vec::with_capacity(plies);

    for _ in 0..plies {
        let legal: Vec<_> = MoveGen::new_legal(&board).collect();
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let start = (state >> 33) as usize % legal.len();

        let chosen = (0..legal.len())
            .map(|offset| legal[(start + offset) % legal.len()])
            .find(|m| {
                let next = board.make_move_new(*m);
                !seen.contains(&next.get_hash()) && MoveGen::new_legal(&next).len() > 0
            })
            .expect("generator found no fresh continuation");

        moves.push(long_san(&board, chosen));
        board = board.make_move_new(chosen);
        seen.insert(board.get_hash());
    }

    GameRecord {
        hexdigest: hexdigest.to_string(),
        metadata: GameMetadata {
            white: white.to_string(),
            black: black.to_string(),
            result: "*".to_string(),
            utc_date: Some("2024.05.01".to_string()),
            ..Default::default()
        },
        moves,
        pgn: String::new(),
        tags: Vec::new(),
    }
}

/// `count` short games between alice and a rotating opponent, alternating colours.
pub fn game_set(count: usize, plies: usize) -> Vec<GameRecord> {
    (0..count)
        .map(|i| {
            let opponent = format!("opponent{}", i % 3);
            let id = format!("game{i:03}");
            if i % 2 == 0 {
                generated_game(&id, "alice", &opponent, plies, i as u64)
            } else {
                generated_game(&id, &opponent, "Alice", plies, i as u64)
            }
        })
        .collect()
}

pub fn context(
    games: Arc<MemoryGameStore>,
    cache: Arc<MemoryCacheStore>,
    launcher: ScriptedLauncher,
    local_slots: usize,
) -> TestContext {
    let specs = (0..local_slots)
        .map(|_| EngineSpec::local("stockfish", vec![]))
        .collect();
    AnalysisContext::new(cache, games, Arc::new(ResourceArbiter::new(launcher, specs)), 1)
}

pub fn request(username: &str) -> AnalysisRequest {
    AnalysisRequest {
        filter: GameFilter {
            exclude_invalid_for: Some(ACCURACY_ANALYSIS.to_string()),
            ..GameFilter::for_user(username)
        },
        players: PlayerSelection::Target,
    }
}

/// A shutdown signal that never fires.
pub async fn never() {
    std::future::pending::<()>().await
}
