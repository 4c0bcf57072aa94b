//! In-memory fakes for the oracle and storage traits (testing only)
//!
//! Provides `ScriptedLauncher`, `MemoryCacheStore` and `MemoryGameStore`
//! that satisfy the trait contracts without Stockfish or Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chess_core::GameRecord;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{OracleError, StoreError};
use crate::filter::GameFilter;
use crate::oracle::{EngineSpec, Oracle, OracleLauncher};
use crate::score::EvaluationValue;
use crate::store::{normalize_fen, CacheStore, EvaluationKey, GameStore, PutOutcome};

// ---------------------------------------------------------------------------
// ScriptedLauncher
// ---------------------------------------------------------------------------

pub type Scorer = Arc<dyn Fn(&str, &str) -> EvaluationValue + Send + Sync>;

struct Failure {
    /// 1-based count of distinct positions after which the engine dies
    at_position: usize,
    error: OracleError,
    fired: AtomicBool,
}

struct Script {
    scorer: Scorer,
    delay: Option<Duration>,
    failure: Option<Failure>,
    positions: Mutex<Vec<String>>,
    calls: Arc<AtomicUsize>,
    launches: Arc<AtomicUsize>,
}

/// Launches engines that answer from a scoring function instead of searching.
/// Every engine it starts shares the same script and counters.
#[derive(Clone)]
pub struct ScriptedLauncher {
    script: Arc<Script>,
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::with_scorer(default_score)
    }
}

impl ScriptedLauncher {
    pub fn with_scorer(scorer: impl Fn(&str, &str) -> EvaluationValue + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(Script {
                scorer: Arc::new(scorer),
                delay: None,
                failure: None,
                positions: Mutex::new(Vec::new()),
                calls: Arc::new(AtomicUsize::new(0)),
                launches: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// The engine fails with `error` once, on the first call for the
    /// `position`-th distinct FEN it is asked about.
    pub fn dying_at_position(mut self, position: usize, error: OracleError) -> Self {
        self.script_mut().failure = Some(Failure {
            at_position: position,
            error,
            fired: AtomicBool::new(false),
        });
        self
    }

    /// Sleep before answering, so concurrent tasks interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script_mut().delay = Some(delay);
        self
    }

    /// Evaluations answered so far.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.script.calls.clone()
    }

    /// Engines started so far.
    pub fn launches(&self) -> Arc<AtomicUsize> {
        self.script.launches.clone()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("configure the launcher before cloning it")
    }
}

/// Stable pseudo-score in -300..=300 derived from the position and move text.
/// Move counters are ignored, as they are in evaluation cache keys.
pub fn default_score(fen: &str, candidate: &str) -> EvaluationValue {
    let position = normalize_fen(fen);
    let sum: u32 = position.bytes().chain(candidate.bytes()).map(u32::from).sum();
    EvaluationValue::from_cp((sum % 601) as i32 - 300)
}

#[async_trait]
impl OracleLauncher for ScriptedLauncher {
    type Oracle = ScriptedOracle;

    async fn launch(&self, _spec: &EngineSpec) -> Result<ScriptedOracle, OracleError> {
        self.script.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedOracle {
            script: self.script.clone(),
        })
    }
}

pub struct ScriptedOracle {
    script: Arc<Script>,
}

impl ScriptedOracle {
    fn check_failure(&self, fen: &str) -> Result<(), OracleError> {
        let Some(failure) = &self.script.failure else {
            return Ok(());
        };
        let mut positions = self.script.positions.lock().unwrap();
        if !positions.iter().any(|p| p == fen) {
            positions.push(fen.to_string());
            if positions.len() == failure.at_position && !failure.fired.swap(true, Ordering::SeqCst) {
                return Err(failure.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn evaluate(&mut self, fen: &str, candidate: &str) -> Result<EvaluationValue, OracleError> {
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failure(fen)?;
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.script.scorer)(fen, candidate))
    }

    async fn quit(&mut self) {}
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

type AccuracyKey = (String, String, i32);

/// Write-once evaluation and accuracy cache backed by `HashMap`s.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    evaluations: Mutex<HashMap<EvaluationKey, EvaluationValue>>,
    accuracy: Mutex<HashMap<AccuracyKey, Vec<f64>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.lock().unwrap().len()
    }

    pub fn accuracy_count(&self) -> usize {
        self.accuracy.lock().unwrap().len()
    }

    /// Drop finished sequences but keep evaluations, forcing a recompute from cache.
    pub fn forget_accuracy(&self) {
        self.accuracy.lock().unwrap().clear();
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_evaluation(&self, key: &EvaluationKey) -> Result<Option<EvaluationValue>, StoreError> {
        Ok(self.evaluations.lock().unwrap().get(key).copied())
    }

    async fn put_evaluation(
        &self,
        key: &EvaluationKey,
        value: EvaluationValue,
    ) -> Result<PutOutcome, StoreError> {
        let mut evaluations = self.evaluations.lock().unwrap();
        match evaluations.get(key) {
            None => {
                evaluations.insert(key.clone(), value);
                Ok(PutOutcome::Inserted)
            }
            Some(existing) if *existing == value => Ok(PutOutcome::AlreadyPresent),
            Some(existing) => Ok(PutOutcome::Conflict { existing: *existing }),
        }
    }

    async fn get_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
    ) -> Result<Option<Vec<f64>>, StoreError> {
        let key = (game.to_string(), username.to_string(), schema_version);
        Ok(self.accuracy.lock().unwrap().get(&key).cloned())
    }

    async fn put_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
        sequence: &[f64],
    ) -> Result<bool, StoreError> {
        let key = (game.to_string(), username.to_string(), schema_version);
        let mut accuracy = self.accuracy.lock().unwrap();
        if accuracy.contains_key(&key) {
            return Ok(false);
        }
        accuracy.insert(key, sequence.to_vec());
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MemoryGameStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredGame {
    game: GameRecord,
    invalid_for: Vec<String>,
    /// Set when the stored text should fail to parse on read
    unreadable: Option<String>,
}

/// Game store over a `Vec`, yielding games in insertion order.
#[derive(Debug, Default)]
pub struct MemoryGameStore {
    games: Mutex<Vec<StoredGame>>,
}

impl MemoryGameStore {
    pub fn new(games: Vec<GameRecord>) -> Self {
        Self {
            games: Mutex::new(
                games
                    .into_iter()
                    .map(|game| StoredGame {
                        game,
                        invalid_for: Vec::new(),
                        unreadable: None,
                    })
                    .collect(),
            ),
        }
    }

    pub fn is_invalid(&self, hexdigest: &str, analysis: &str) -> bool {
        self.games
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.game.hexdigest == hexdigest && s.invalid_for.iter().any(|a| a == analysis))
    }

    pub fn tags(&self, hexdigest: &str) -> Vec<String> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.game.hexdigest == hexdigest)
            .map(|s| s.game.tags.clone())
            .unwrap_or_default()
    }

    /// Make the stored game fail to read back, as a damaged PGN would.
    pub fn corrupt(&self, hexdigest: &str, reason: &str) {
        let mut games = self.games.lock().unwrap();
        if let Some(stored) = games.iter_mut().find(|s| s.game.hexdigest == hexdigest) {
            stored.unreadable = Some(reason.to_string());
        }
    }

    fn selected(&self, filter: &GameFilter) -> Vec<Result<GameRecord, StoreError>> {
        let games = self.games.lock().unwrap();
        let matching = games.iter().filter(|s| {
            filter.matches(&s.game)
                && !filter
                    .exclude_invalid_for
                    .as_ref()
                    .is_some_and(|analysis| s.invalid_for.contains(analysis))
        });
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        matching
            .take(limit)
            .map(|s| match &s.unreadable {
                None => Ok(s.game.clone()),
                Some(reason) => Err(StoreError::UnreadableGame {
                    hexdigest: s.game.hexdigest.clone(),
                    white: s.game.metadata.white.clone(),
                    black: s.game.metadata.black.clone(),
                    reason: reason.clone(),
                }),
            })
            .collect()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn count(&self, filter: &GameFilter) -> Result<u64, StoreError> {
        Ok(self.selected(filter).len() as u64)
    }

    fn stream<'a>(&'a self, filter: &'a GameFilter) -> BoxStream<'a, Result<GameRecord, StoreError>> {
        stream::iter(self.selected(filter)).boxed()
    }

    async fn insert_game(&self, game: &GameRecord) -> Result<bool, StoreError> {
        let mut games = self.games.lock().unwrap();
        if games.iter().any(|s| s.game.hexdigest == game.hexdigest) {
            return Ok(false);
        }
        games.push(StoredGame {
            game: game.clone(),
            invalid_for: Vec::new(),
            unreadable: None,
        });
        Ok(true)
    }

    async fn mark_invalid(&self, hexdigest: &str, analysis: &str) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap();
        if let Some(stored) = games.iter_mut().find(|s| s.game.hexdigest == hexdigest) {
            if !stored.invalid_for.iter().any(|a| a == analysis) {
                stored.invalid_for.push(analysis.to_string());
            }
        }
        Ok(())
    }

    async fn clear_invalid(&self, username: &str, analysis: &str) -> Result<u64, StoreError> {
        let mut games = self.games.lock().unwrap();
        let mut cleared = 0;
        for stored in games.iter_mut() {
            if stored.game.metadata.player_side(username).is_none() {
                continue;
            }
            let before = stored.invalid_for.len();
            stored.invalid_for.retain(|a| a != analysis);
            if stored.invalid_for.len() != before {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn add_tag(&self, hexdigest: &str, tag: &str) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap();
        if let Some(stored) = games.iter_mut().find(|s| s.game.hexdigest == hexdigest) {
            if !stored.game.tags.iter().any(|t| t == tag) {
                stored.game.tags.push(tag.to_string());
            }
        }
        Ok(())
    }
}
