//! Per-move accuracy for one player in one game

use std::sync::Arc;

use chess_core::GameRecord;
use tracing::{debug, info, warn};

use crate::arbiter::ResourceArbiter;
use crate::error::WorkerError;
use crate::oracle::{OracleLauncher, ResourceClass};
use crate::ranking::{rank_moves, OracleSession};
use crate::replay::{legal_moves, replay, uci};
use crate::store::{CacheStore, GameStore, ACCURACY_ANALYSIS};

/// Shared handles every analysis task needs. Built once in `main`.
pub struct AnalysisContext<C, G, L: OracleLauncher> {
    pub cache: Arc<C>,
    pub games: Arc<G>,
    pub arbiter: Arc<ResourceArbiter<L>>,
    pub schema_version: i32,
    /// Engine classes to try, most preferred first
    pub preference: Arc<[ResourceClass]>,
}

impl<C, G, L: OracleLauncher> Clone for AnalysisContext<C, G, L> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            games: self.games.clone(),
            arbiter: self.arbiter.clone(),
            schema_version: self.schema_version,
            preference: self.preference.clone(),
        }
    }
}

impl<C, G, L> AnalysisContext<C, G, L>
where
    C: CacheStore,
    G: GameStore,
    L: OracleLauncher,
{
    /// Remote engines first, local as the fallback.
    pub fn new(cache: Arc<C>, games: Arc<G>, arbiter: Arc<ResourceArbiter<L>>, schema_version: i32) -> Self {
        Self {
            cache,
            games,
            arbiter,
            schema_version,
            preference: Arc::from([ResourceClass::Remote, ResourceClass::Local]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccuracyOutcome {
    Completed {
        /// One fraction in (0, 1] per move the player made
        moves: Vec<f64>,
        /// Loaded from a previous run rather than computed now
        cached: bool,
    },
    /// The engine died mid-game; the game is flagged and yields nothing.
    Invalidated,
}

impl AccuracyOutcome {
    /// Mean accuracy, `None` when there is nothing to average.
    pub fn average(&self) -> Option<f64> {
        match self {
            AccuracyOutcome::Completed { moves, .. } if !moves.is_empty() => {
                Some(moves.iter().sum::<f64>() / moves.len() as f64)
            }
            _ => None,
        }
    }
}

/// Accuracy of every move `username` made in `game`.
///
/// A finished sequence is returned from the cache without touching the board.
/// Otherwise the game is replayed and each of the player's moves is scored as
/// `(legal_moves - class_index) / legal_moves`. The sequence is persisted only
/// once the whole game has been walked. If the engine process dies, the game is
/// flagged invalid for this analysis and `Invalidated` is returned; any other
/// engine failure is returned as an error.
pub async fn compute_move_accuracy<C, G, L>(
    ctx: &AnalysisContext<C, G, L>,
    game: &GameRecord,
    username: &str,
) -> Result<AccuracyOutcome, WorkerError>
where
    C: CacheStore,
    G: GameStore,
    L: OracleLauncher,
{
    let player = username.to_lowercase();
    let hexdigest = game.hexdigest.as_str();

    if let Some(moves) = ctx
        .cache
        .get_accuracy(hexdigest, &player, ctx.schema_version)
        .await?
    {
        debug!(game = %hexdigest, username = %player, "Accuracy already computed");
        return Ok(AccuracyOutcome::Completed { moves, cached: true });
    }

    let side = game
        .metadata
        .player_side(username)
        .ok_or_else(|| WorkerError::invalid_game(hexdigest, format!("{username} did not play this game")))?;
    let plies = replay(game).map_err(|reason| WorkerError::invalid_game(hexdigest, reason))?;

    let mut session = OracleSession::new(&ctx.arbiter, &ctx.preference);
    let mut moves = Vec::new();

    for ply in plies.iter().filter(|ply| ply.mover() == side) {
        let fen = ply.fen();
        let legal: Vec<String> = legal_moves(&ply.board).into_iter().map(uci).collect();

        let ranking = match rank_moves(&fen, &legal, ctx.cache.as_ref(), &mut session, ctx.schema_version).await {
            Ok(ranking) => ranking,
            Err(WorkerError::Oracle(err)) if err.is_recoverable() => {
                warn!(
                    game = %hexdigest,
                    username = %player,
                    move_number = moves.len() + 1,
                    error = %err,
                    "Engine died, marking game invalid"
                );
                session.discard();
                session.release();
                ctx.games.mark_invalid(hexdigest, ACCURACY_ANALYSIS).await?;
                return Ok(AccuracyOutcome::Invalidated);
            }
            Err(err) => return Err(err),
        };

        let played = uci(ply.played);
        let accuracy = ranking.accuracy_of(&played).ok_or_else(|| {
            WorkerError::invalid_game(hexdigest, format!("{played} missing from ranking of {fen}"))
        })?;
        moves.push(accuracy);
    }

    let oracle_calls = session.calls();
    session.release();

    if !ctx
        .cache
        .put_accuracy(hexdigest, &player, ctx.schema_version, &moves)
        .await?
    {
        debug!(game = %hexdigest, username = %player, "Accuracy stored concurrently, keeping first");
    }
    ctx.games.add_tag(hexdigest, ACCURACY_ANALYSIS).await?;

    info!(
        game = %hexdigest,
        username = %player,
        moves = moves.len(),
        oracle_calls,
        "Accuracy computed"
    );
    Ok(AccuracyOutcome::Completed { moves, cached: false })
}
