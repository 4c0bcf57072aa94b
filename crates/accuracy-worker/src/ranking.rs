//! Ranking every legal move of a position by engine evaluation.
//!
//! Scores come from the evaluation cache when present; only misses lease an
//! engine, and the lease is taken on the first miss, so a fully cached
//! position never touches the arbiter.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use tracing::warn;

use crate::arbiter::{OracleLease, ResourceArbiter};
use crate::error::{OracleError, WorkerError};
use crate::oracle::{OracleLauncher, ResourceClass};
use crate::score::EvaluationValue;
use crate::store::{CacheStore, EvaluationKey, PutOutcome};

/// Moves sharing one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RankClass {
    pub value: EvaluationValue,
    /// UCI moves, in legal-move generation order
    pub moves: Vec<String>,
}

/// Rank classes from best to worst, plus the number of legal moves ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub classes: Vec<RankClass>,
    pub total: usize,
}

impl Ranking {
    pub fn from_scores(scored: impl IntoIterator<Item = (String, EvaluationValue)>) -> Self {
        let mut grouped: BTreeMap<Reverse<EvaluationValue>, Vec<String>> = BTreeMap::new();
        let mut total = 0;
        for (uci, value) in scored {
            grouped.entry(Reverse(value)).or_default().push(uci);
            total += 1;
        }

        let classes = grouped
            .into_iter()
            .map(|(Reverse(value), moves)| RankClass { value, moves })
            .collect();
        Self { classes, total }
    }

    /// Zero-based index of the class containing `uci`.
    pub fn class_index(&self, uci: &str) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.moves.iter().any(|m| m == uci))
    }

    /// `(total - class_index) / total`: 1.0 for a best move.
    pub fn accuracy_of(&self, uci: &str) -> Option<f64> {
        let index = self.class_index(uci)?;
        Some((self.total - index) as f64 / self.total as f64)
    }
}

/// An engine lease held for the length of one game, taken on first use.
pub struct OracleSession<'a, L: OracleLauncher> {
    arbiter: &'a ResourceArbiter<L>,
    preference: &'a [ResourceClass],
    lease: Option<OracleLease<L>>,
    calls: usize,
}

impl<'a, L: OracleLauncher> OracleSession<'a, L> {
    pub fn new(arbiter: &'a ResourceArbiter<L>, preference: &'a [ResourceClass]) -> Self {
        Self {
            arbiter,
            preference,
            lease: None,
            calls: 0,
        }
    }

    pub async fn evaluate(&mut self, fen: &str, candidate: &str) -> Result<EvaluationValue, WorkerError> {
        let lease = match self.lease.take() {
            Some(lease) => lease,
            None => self
                .arbiter
                .acquire_preferring(self.preference)
                .await
                .ok_or_else(|| OracleError::Launch("no engine slots configured".to_string()))?,
        };
        let lease = self.lease.insert(lease);
        self.calls += 1;
        Ok(lease.evaluate(fen, candidate).await?)
    }

    /// Oracle calls made through this session.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Tear down a dead engine; the next lease of its slot starts a new one.
    pub fn discard(&mut self) {
        if let Some(lease) = &mut self.lease {
            lease.discard();
        }
    }

    pub fn release(&mut self) {
        self.lease = None;
    }
}

/// Rank `legal` (UCI, generation order) in `fen`, reading through the cache.
pub async fn rank_moves<C, L>(
    fen: &str,
    legal: &[String],
    cache: &C,
    session: &mut OracleSession<'_, L>,
    schema_version: i32,
) -> Result<Ranking, WorkerError>
where
    C: CacheStore + ?Sized,
    L: OracleLauncher,
{
    let mut scored = Vec::with_capacity(legal.len());
    for candidate in legal {
        let key = EvaluationKey::new(fen, candidate, schema_version);
        let value = match cache.get_evaluation(&key).await? {
            Some(value) => value,
            None => {
                let value = session.evaluate(fen, candidate).await?;
                match cache.put_evaluation(&key, value).await? {
                    PutOutcome::Inserted | PutOutcome::AlreadyPresent => value,
                    PutOutcome::Conflict { existing } => {
                        warn!(
                            fen = %key.fen,
                            candidate = %candidate,
                            stored = existing.get(),
                            rejected = value.get(),
                            "Conflicting evaluation ignored, keeping stored value"
                        );
                        existing
                    }
                }
            }
        };
        scored.push((candidate.clone(), value));
    }
    Ok(Ranking::from_scores(scored))
}
