//! Worker configuration from environment variables

use std::env;
use std::str::FromStr;

use crate::error::WorkerError;
use crate::oracle::EngineSpec;

const DEFAULT_LOCAL_HASH_MB: u32 = 256;
const DEFAULT_REMOTE_HASH_MB: u32 = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerConfig {
    /// Database connection URL
    pub database_url: String,

    /// Path to the local Stockfish binary
    pub stockfish_path: String,

    /// Command run on remote hosts through ssh
    pub remote_command: String,

    /// `go movetime` per candidate move
    pub think_time_ms: u64,

    /// Stockfish `Threads` option
    pub engine_threads: u32,

    /// Stockfish `Hash` option for local engines
    pub local_hash_mb: u32,

    /// Stockfish `Hash` option for remote engines
    pub remote_hash_mb: u32,

    /// Stockfish `SyzygyPath`, only sent when set
    pub syzygy_path: Option<String>,

    /// Local engine slots
    pub local_engines: usize,

    /// Bumped whenever scoring changes so stale cache entries are ignored
    pub schema_version: i32,

    /// Pool size override; defaults to worker count + 2
    pub db_max_connections: Option<u32>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `load` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkerError> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| WorkerError::Config("DATABASE_URL not set".into()))?;

        let stockfish_path = lookup("STOCKFISH_PATH").unwrap_or_else(|| "stockfish".to_string());
        let remote_command =
            lookup("REMOTE_STOCKFISH_COMMAND").unwrap_or_else(|| "stockfish".to_string());

        let hash = parse_var(&lookup, "ENGINE_HASH_MB")?;

        Ok(Self {
            database_url,
            stockfish_path,
            remote_command,
            think_time_ms: parse_var(&lookup, "THINK_TIME_MS")?.unwrap_or(1),
            engine_threads: parse_var(&lookup, "ENGINE_THREADS")?.unwrap_or(2),
            local_hash_mb: hash.unwrap_or(DEFAULT_LOCAL_HASH_MB),
            remote_hash_mb: hash.unwrap_or(DEFAULT_REMOTE_HASH_MB),
            syzygy_path: lookup("SYZYGY_PATH").filter(|p| !p.is_empty()),
            local_engines: parse_var(&lookup, "LOCAL_ENGINES")?.unwrap_or_else(num_cpus::get),
            schema_version: parse_var(&lookup, "CACHE_SCHEMA_VERSION")?.unwrap_or(1),
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS")?,
        })
    }

    pub fn pool_size(&self, worker_count: usize) -> u32 {
        self.db_max_connections
            .unwrap_or((worker_count + 2) as u32) // headroom for overlapping saves
    }

    /// One spec per engine slot: `local_engines` local, then one per remote address.
    pub fn engine_specs(&self, remote_addresses: &[String]) -> Vec<EngineSpec> {
        let mut specs: Vec<EngineSpec> = (0..self.local_engines.max(1))
            .map(|_| EngineSpec::local(&self.stockfish_path, self.options(self.local_hash_mb)))
            .collect();

        specs.extend(
            remote_addresses
                .iter()
                .map(|addr| addr.trim())
                .filter(|addr| !addr.is_empty())
                .map(|addr| {
                    EngineSpec::remote(addr, &self.remote_command, self.options(self.remote_hash_mb))
                }),
        );
        specs
    }

    fn options(&self, hash_mb: u32) -> Vec<(String, String)> {
        let mut options = vec![
            ("Threads".to_string(), self.engine_threads.to_string()),
            ("Hash".to_string(), hash_mb.to_string()),
        ];
        if let Some(path) = &self.syzygy_path {
            options.push(("SyzygyPath".to_string(), path.clone()));
        }
        options
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, WorkerError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::Config(format!("{key} has invalid value {raw:?}"))),
    }
}
