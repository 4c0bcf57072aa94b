//! Runs accuracy analysis over every matching game with bounded concurrency.
//!
//! Games are streamed from the store and each becomes one task in a
//! `JoinSet`. A semaphore permit is taken before spawning, so at most
//! `worker_count` games are in flight. Per-game input errors, unreadable
//! stored games and engine deaths count as processed; storage failures and
//! engine protocol failures abort the run.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use chess_core::GameRecord;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::accuracy::{compute_move_accuracy, AccuracyOutcome, AnalysisContext};
use crate::error::{StoreError, WorkerError};
use crate::filter::GameFilter;
use crate::oracle::OracleLauncher;
use crate::store::{CacheStore, GameStore};

/// Whose moves to score in each game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSelection {
    /// Only the filter's username
    Target,
    /// White and black, for ranking games by overall quality
    BothSides,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub filter: GameFilter,
    pub players: PlayerSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(Vec<f64>),
    Invalidated,
    /// Input error for this game only
    Skipped(String),
}

impl TaskOutcome {
    pub fn average(&self) -> Option<f64> {
        match self {
            TaskOutcome::Completed(moves) if !moves.is_empty() => {
                Some(moves.iter().sum::<f64>() / moves.len() as f64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerReport {
    pub username: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameReport {
    pub hexdigest: String,
    pub white: String,
    pub black: String,
    pub link: Option<String>,
    pub players: Vec<PlayerReport>,
}

impl GameReport {
    /// The game's contribution to the run average, if it was analyzable.
    pub fn score(&self, selection: PlayerSelection) -> Option<f64> {
        match selection {
            PlayerSelection::Target => self.players.first()?.outcome.average(),
            PlayerSelection::BothSides => {
                let [white, black] = self.players.as_slice() else {
                    return None;
                };
                Some((white.outcome.average()? + black.outcome.average()?) / 2.0)
            }
        }
    }
}

/// Running sum of per-game averages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccuracyTotals {
    pub games: usize,
    pub sum: f64,
}

impl AccuracyTotals {
    pub fn add(&mut self, average: f64) {
        self.games += 1;
        self.sum += average;
    }

    pub fn merge(self, other: AccuracyTotals) -> AccuracyTotals {
        AccuracyTotals {
            games: self.games + other.games,
            sum: self.sum + other.sum,
        }
    }

    pub fn average(&self) -> Option<f64> {
        (self.games > 0).then(|| self.sum / self.games as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    NoGamesFound,
    NoneAnalyzable { processed: usize },
    Analyzed { games: usize, average: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub username: String,
    pub selection: PlayerSelection,
    pub games_found: u64,
    /// Sorted by hexdigest
    pub reports: Vec<GameReport>,
    /// Submission stopped early on a shutdown signal
    pub interrupted: bool,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.reports.len()
    }

    /// Folded in hexdigest order, so the result does not depend on task completion order.
    pub fn totals(&self) -> AccuracyTotals {
        self.reports
            .iter()
            .filter_map(|report| report.score(self.selection))
            .fold(AccuracyTotals::default(), |mut totals, average| {
                totals.add(average);
                totals
            })
    }

    pub fn outcome(&self) -> ReportOutcome {
        if self.games_found == 0 {
            return ReportOutcome::NoGamesFound;
        }
        let totals = self.totals();
        match totals.average() {
            Some(average) => ReportOutcome::Analyzed {
                games: totals.games,
                average,
            },
            None => ReportOutcome::NoneAnalyzable {
                processed: self.processed(),
            },
        }
    }

    /// Highest-scoring games first; ties broken by hexdigest.
    pub fn best_games(&self, count: usize) -> Vec<(&GameReport, f64)> {
        let mut scored: Vec<(&GameReport, f64)> = self
            .reports
            .iter()
            .filter_map(|report| Some((report, report.score(self.selection)?)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.hexdigest.cmp(&b.0.hexdigest))
        });
        scored.truncate(count);
        scored
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Games found: {}", self.games_found);
        match self.outcome() {
            ReportOutcome::NoGamesFound => {
                let _ = writeln!(out, "No games found for {}", self.username);
            }
            ReportOutcome::NoneAnalyzable { processed } => {
                let _ = writeln!(out, "Games analyzed: 0");
                let _ = writeln!(out, "None of the {processed} processed games could be analyzed");
            }
            ReportOutcome::Analyzed { games, average } => {
                let _ = writeln!(out, "Games analyzed: {games}");
                let _ = writeln!(out, "Average accuracy: {:.2}%", average * 100.0);
            }
        }
        if self.interrupted {
            let _ = writeln!(out, "Interrupted before all games were submitted");
        }
        out
    }

    pub fn render_best(&self, count: usize) -> String {
        let mut out = self.render();
        for (rank, (report, score)) in self.best_games(count).into_iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {:6.2}%  {} vs {}  {}",
                rank + 1,
                score * 100.0,
                report.white,
                report.black,
                report.link.as_deref().unwrap_or(&report.hexdigest)
            );
        }
        out
    }
}

pub struct Scheduler<C, G, L: OracleLauncher> {
    ctx: AnalysisContext<C, G, L>,
    worker_count: usize,
}

impl<C, G, L> Scheduler<C, G, L>
where
    C: CacheStore,
    G: GameStore,
    L: OracleLauncher,
{
    pub fn new(ctx: AnalysisContext<C, G, L>, worker_count: usize) -> Self {
        Self {
            ctx,
            worker_count: worker_count.max(1),
        }
    }

    /// Analyze every game matching `request`. Completing `shutdown` stops
    /// submission; tasks already running are drained before returning.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, WorkerError> {
        let filter = &request.filter;
        let games_found = self.ctx.games.count(filter).await?;
        let mut summary = RunSummary {
            username: filter.username.clone(),
            selection: request.players,
            games_found,
            reports: Vec::new(),
            interrupted: false,
        };
        if games_found == 0 {
            info!(username = %filter.username, "No games found");
            return Ok(summary);
        }
        info!(
            username = %filter.username,
            games_found,
            worker_count = self.worker_count,
            "Starting accuracy run"
        );

        let permits = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks: JoinSet<Result<GameReport, WorkerError>> = JoinSet::new();
        let mut games = self.ctx.games.stream(filter);
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                next = games.next() => next,
            };
            let Some(game) = next else { break };
            let game = match game {
                Ok(game) => game,
                Err(StoreError::UnreadableGame {
                    hexdigest,
                    white,
                    black,
                    reason,
                }) => {
                    warn!(game = %hexdigest, reason = %reason, "Skipping unreadable game");
                    let players = players_for(&white, &black, request);
                    summary.reports.push(GameReport {
                        hexdigest,
                        white,
                        black,
                        link: None,
                        players: players
                            .into_iter()
                            .map(|username| PlayerReport {
                                username,
                                outcome: TaskOutcome::Skipped(reason.clone()),
                            })
                            .collect(),
                    });
                    continue;
                }
                Err(e) => return Err(self.abort(&mut tasks, e.into()).await),
            };

            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                permit = permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            while let Some(joined) = tasks.try_join_next() {
                match flatten(joined) {
                    Ok(report) => summary.reports.push(report),
                    Err(e) => return Err(self.abort(&mut tasks, e).await),
                }
            }

            let ctx = self.ctx.clone();
            let players = players_for(&game.metadata.white, &game.metadata.black, request);
            tasks.spawn(async move {
                let _permit = permit; // Hold until done
                analyze_game(&ctx, game, players).await
            });
        }

        if summary.interrupted {
            info!(in_flight = tasks.len(), "Shutdown requested, draining in-flight games");
        }
        while let Some(joined) = tasks.join_next().await {
            match flatten(joined) {
                Ok(report) => summary.reports.push(report),
                Err(e) => return Err(self.abort(&mut tasks, e).await),
            }
        }

        summary.reports.sort_by(|a, b| a.hexdigest.cmp(&b.hexdigest));
        info!(
            username = %filter.username,
            processed = summary.processed(),
            analyzed = summary.totals().games,
            "Accuracy run finished"
        );
        Ok(summary)
    }

    async fn abort(
        &self,
        tasks: &mut JoinSet<Result<GameReport, WorkerError>>,
        err: WorkerError,
    ) -> WorkerError {
        error!(error = %err, in_flight = tasks.len(), "Fatal error, aborting remaining games");
        tasks.shutdown().await;
        err
    }
}

fn flatten(
    joined: Result<Result<GameReport, WorkerError>, tokio::task::JoinError>,
) -> Result<GameReport, WorkerError> {
    joined?
}

fn players_for(white: &str, black: &str, request: &AnalysisRequest) -> Vec<String> {
    match request.players {
        PlayerSelection::Target => vec![request.filter.username.clone()],
        PlayerSelection::BothSides => vec![white.to_string(), black.to_string()],
    }
}

async fn analyze_game<C, G, L>(
    ctx: &AnalysisContext<C, G, L>,
    game: GameRecord,
    players: Vec<String>,
) -> Result<GameReport, WorkerError>
where
    C: CacheStore,
    G: GameStore,
    L: OracleLauncher,
{
    let mut reports = Vec::with_capacity(players.len());
    let mut invalidated = false;

    for username in players {
        let outcome = if invalidated {
            TaskOutcome::Invalidated
        } else {
            match compute_move_accuracy(ctx, &game, &username).await {
                Ok(AccuracyOutcome::Completed { moves, .. }) => TaskOutcome::Completed(moves),
                Ok(AccuracyOutcome::Invalidated) => {
                    invalidated = true;
                    TaskOutcome::Invalidated
                }
                Err(e) if !e.is_fatal() => {
                    warn!(game = %game.hexdigest, username = %username, error = %e, "Skipping game");
                    TaskOutcome::Skipped(e.to_string())
                }
                Err(e) => return Err(e),
            }
        };
        reports.push(PlayerReport { username, outcome });
    }

    Ok(GameReport {
        hexdigest: game.hexdigest,
        white: game.metadata.white,
        black: game.metadata.black,
        link: game.metadata.link,
        players: reports,
    })
}
