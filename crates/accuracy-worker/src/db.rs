//! Postgres-backed game store and evaluation cache

use async_trait::async_trait;
use chess_core::pgn::parse_pgn;
use chess_core::GameRecord;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::warn;

use crate::error::StoreError;
use crate::filter::GameFilter;
use crate::score::EvaluationValue;
use crate::store::{CacheStore, EvaluationKey, GameStore, PutOutcome};

/// Games fetched per round trip while streaming
const STREAM_BATCH_SIZE: i64 = 10;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Run the schema migration inline.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Imported games, identified by the hash of their PGN text
CREATE TABLE IF NOT EXISTS games (
    id           BIGSERIAL PRIMARY KEY,
    hexdigest    TEXT UNIQUE NOT NULL,
    white        TEXT NOT NULL,
    black        TEXT NOT NULL,
    result       TEXT NOT NULL,
    time_control TEXT,
    variant      TEXT,
    link         TEXT,
    played_at    TIMESTAMP,
    pgn          TEXT NOT NULL,
    tags         TEXT[] NOT NULL DEFAULT '{}',
    invalid_for  TEXT[] NOT NULL DEFAULT '{}',
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_games_white_lower ON games (LOWER(white));
CREATE INDEX IF NOT EXISTS idx_games_black_lower ON games (LOWER(black));
CREATE INDEX IF NOT EXISTS idx_games_played_at   ON games (played_at);

-- One engine score per (position, candidate move, scoring schema)
CREATE TABLE IF NOT EXISTS move_evaluations (
    fen            TEXT NOT NULL,
    candidate      TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    value          INTEGER NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (fen, candidate, schema_version)
);

-- Finished per-move accuracy for one player in one game
CREATE TABLE IF NOT EXISTS move_accuracy (
    game_hexdigest TEXT NOT NULL REFERENCES games(hexdigest) ON DELETE CASCADE,
    username       TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    move_accuracy  DOUBLE PRECISION[] NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (game_hexdigest, username, schema_version)
);
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_batch(
        &self,
        filter: &GameFilter,
        after_id: i64,
        batch: i64,
    ) -> Result<Vec<(i64, Result<GameRecord, StoreError>)>, StoreError> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT id, hexdigest, white, black, pgn, tags FROM games WHERE id > ");
        qb.push_bind(after_id);
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id LIMIT ").push_bind(batch);

        let rows: Vec<(i64, String, String, String, String, Vec<String>)> =
            qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(id, hexdigest, white, black, pgn, tags)| {
                (id, game_from_row(hexdigest, white, black, &pgn, tags))
            })
            .collect())
    }
}

/// Append the filter's WHERE conditions (without LIMIT).
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &GameFilter) {
    let username = filter.username.to_lowercase();
    match filter.color.side() {
        Some(chess_core::Side::White) => {
            qb.push(" AND LOWER(white) = ").push_bind(username);
        }
        Some(chess_core::Side::Black) => {
            qb.push(" AND LOWER(black) = ").push_bind(username);
        }
        None => {
            qb.push(" AND (LOWER(white) = ")
                .push_bind(username.clone())
                .push(" OR LOWER(black) = ")
                .push_bind(username)
                .push(")");
        }
    }
    if let Some(start) = filter.start {
        qb.push(" AND played_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND played_at <= ").push_bind(end);
    }
    if !filter.time_controls.is_empty() {
        qb.push(" AND time_control = ANY(")
            .push_bind(filter.time_controls.clone())
            .push(")");
    }
    if !filter.variants.is_empty() {
        qb.push(" AND variant = ANY(")
            .push_bind(filter.variants.clone())
            .push(")");
    }
    if let Some(analysis) = &filter.exclude_invalid_for {
        qb.push(" AND NOT (")
            .push_bind(analysis.clone())
            .push(" = ANY(invalid_for))");
    }
}

fn game_from_row(
    hexdigest: String,
    white: String,
    black: String,
    pgn: &str,
    tags: Vec<String>,
) -> Result<GameRecord, StoreError> {
    let mut game = match parse_pgn(pgn) {
        Ok(game) => game,
        Err(e) => {
            warn!(game = %hexdigest, error = %e, "Stored PGN no longer parses");
            return Err(StoreError::UnreadableGame {
                hexdigest,
                white,
                black,
                reason: e.to_string(),
            });
        }
    };
    game.hexdigest = hexdigest;
    game.tags = tags;
    Ok(game)
}

#[async_trait]
impl GameStore for PgStore {
    async fn count(&self, filter: &GameFilter) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM games WHERE TRUE");
        push_filter(&mut qb, filter);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        let count = count.max(0) as u64;
        Ok(filter.limit.map_or(count, |limit| count.min(limit)))
    }

    fn stream<'a>(&'a self, filter: &'a GameFilter) -> BoxStream<'a, Result<GameRecord, StoreError>> {
        // (last id seen, games still allowed by the limit)
        let start = (0i64, filter.limit.unwrap_or(u64::MAX));
        stream::try_unfold(start, move |(after_id, remaining)| async move {
            if remaining == 0 {
                return Ok(None);
            }
            let batch = STREAM_BATCH_SIZE.min(remaining.min(i64::MAX as u64) as i64);
            let rows = self.fetch_batch(filter, after_id, batch).await?;
            let Some((last_id, _)) = rows.last() else {
                return Ok(None);
            };
            let next = (*last_id, remaining - rows.len() as u64);
            let games: Vec<_> = rows.into_iter().map(|(_, game)| game).collect();
            Ok::<_, StoreError>(Some((games, next)))
        })
        .map_ok(|games| stream::iter(games.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
        // Unreadable rows come through as items, batch failures as errors
        .map(|item| item.and_then(|game| game))
        .boxed()
    }

    async fn insert_game(&self, game: &GameRecord) -> Result<bool, StoreError> {
        let meta = &game.metadata;
        let result = sqlx::query(
            r#"INSERT INTO games (
                hexdigest, white, black, result, time_control, variant, link, played_at, pgn, tags
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (hexdigest) DO NOTHING"#,
        )
        .bind(&game.hexdigest)
        .bind(&meta.white)
        .bind(&meta.black)
        .bind(&meta.result)
        .bind(&meta.time_control)
        .bind(&meta.variant)
        .bind(&meta.link)
        .bind(meta.played_at())
        .bind(&game.pgn)
        .bind(&game.tags)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_invalid(&self, hexdigest: &str, analysis: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE games SET invalid_for = array_append(invalid_for, $2)
             WHERE hexdigest = $1 AND NOT ($2 = ANY(invalid_for))",
        )
        .bind(hexdigest)
        .bind(analysis)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_invalid(&self, username: &str, analysis: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE games SET invalid_for = array_remove(invalid_for, $2)
             WHERE (LOWER(white) = $1 OR LOWER(black) = $1) AND $2 = ANY(invalid_for)",
        )
        .bind(username.to_lowercase())
        .bind(analysis)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn add_tag(&self, hexdigest: &str, tag: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE games SET tags = array_append(tags, $2)
             WHERE hexdigest = $1 AND NOT ($2 = ANY(tags))",
        )
        .bind(hexdigest)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn get_evaluation(&self, key: &EvaluationKey) -> Result<Option<EvaluationValue>, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT value FROM move_evaluations WHERE fen = $1 AND candidate = $2 AND schema_version = $3",
        )
        .bind(&key.fen)
        .bind(&key.candidate)
        .bind(key.schema_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| EvaluationValue(value)))
    }

    async fn put_evaluation(
        &self,
        key: &EvaluationKey,
        value: EvaluationValue,
    ) -> Result<PutOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO move_evaluations (fen, candidate, schema_version, value)
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(&key.fen)
        .bind(&key.candidate)
        .bind(key.schema_version)
        .bind(value.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(PutOutcome::Inserted);
        }

        // Lost the race (or re-evaluated a known key): compare with the stored value
        let existing = self.get_evaluation(key).await?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "evaluation {} {} vanished after conflicting insert",
                key.fen, key.candidate
            ))
        })?;
        if existing == value {
            Ok(PutOutcome::AlreadyPresent)
        } else {
            Ok(PutOutcome::Conflict { existing })
        }
    }

    async fn get_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
    ) -> Result<Option<Vec<f64>>, StoreError> {
        let row: Option<(Vec<f64>,)> = sqlx::query_as(
            "SELECT move_accuracy FROM move_accuracy
             WHERE game_hexdigest = $1 AND username = $2 AND schema_version = $3",
        )
        .bind(game)
        .bind(username)
        .bind(schema_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(sequence,)| sequence))
    }

    async fn put_accuracy(
        &self,
        game: &str,
        username: &str,
        schema_version: i32,
        sequence: &[f64],
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO move_accuracy (game_hexdigest, username, schema_version, move_accuracy)
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(game)
        .bind(username)
        .bind(schema_version)
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
