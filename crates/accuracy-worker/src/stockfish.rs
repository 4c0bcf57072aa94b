//! Stockfish engine wrapper using UCI protocol (async I/O)

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::OracleError;
use crate::oracle::{EngineSpec, Oracle, OracleLauncher};
use crate::score::EvaluationValue;

/// Stockfish engine instance
pub struct StockfishEngine {
    label: String,
    think_time_ms: u64,
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StockfishEngine {
    /// Spawn a new Stockfish process and initialize UCI
    pub async fn spawn(spec: &EngineSpec, think_time_ms: u64) -> Result<Self, OracleError> {
        let mut process = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Launch(format!("{}: {e}", spec.label)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| OracleError::Launch(format!("{}: stdin not captured", spec.label)))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| OracleError::Launch(format!("{}: stdout not captured", spec.label)))?;

        let mut engine = Self {
            label: spec.label.clone(),
            think_time_ms,
            process,
            stdin,
            stdout: BufReader::new(stdout),
        };

        // An engine that never reaches readyok was never usable
        engine
            .handshake(&spec.options)
            .await
            .map_err(|e| OracleError::Launch(format!("{}: handshake failed: {e}", spec.label)))?;

        info!(engine = %engine.label, class = %spec.class, "Stockfish engine ready");
        Ok(engine)
    }

    /// Initialize UCI and apply engine options
    async fn handshake(&mut self, options: &[(String, String)]) -> Result<(), OracleError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;

        for (name, value) in options {
            self.send(&format!("setoption name {name} value {value}"))
                .await?;
        }
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    /// Send a command to Stockfish
    async fn send(&mut self, cmd: &str) -> Result<(), OracleError> {
        debug!(engine = %self.label, cmd, "SF <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| io_failure("write to", e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| io_failure("flush", e))?;
        Ok(())
    }

    /// Read one line; a closed stdout means the process is gone.
    async fn read_line(&mut self, line: &mut String) -> Result<(), OracleError> {
        line.clear();
        let read = self
            .stdout
            .read_line(line)
            .await
            .map_err(|e| io_failure("read from", e))?;
        if read == 0 {
            return Err(OracleError::Terminated(format!(
                "{} closed its output",
                self.label
            )));
        }
        debug!(engine = %self.label, line = line.trim(), "SF >");
        Ok(())
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), OracleError> {
        let mut line = String::new();
        loop {
            self.read_line(&mut line).await?;
            if line.trim() == expected {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Oracle for StockfishEngine {
    async fn evaluate(&mut self, fen: &str, candidate: &str) -> Result<EvaluationValue, OracleError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!(
            "go movetime {} searchmoves {candidate}",
            self.think_time_ms
        ))
        .await?;

        let mut score = None;
        let mut line = String::new();
        loop {
            self.read_line(&mut line).await?;
            let trimmed = line.trim();

            if trimmed.starts_with("info") && !trimmed.starts_with("info string") {
                if is_bound(trimmed) {
                    continue;
                }
                if let Some(value) = EvaluationValue::from_uci(parse_cp(trimmed), parse_mate(trimmed)) {
                    score = Some(value);
                }
            } else if trimmed.starts_with("bestmove") {
                let best = trimmed.split_whitespace().nth(1).unwrap_or("(none)");
                if best != candidate {
                    return Err(OracleError::Protocol(format!(
                        "{}: searched {candidate} but got bestmove {best}",
                        self.label
                    )));
                }
                break;
            }
        }

        score.ok_or_else(|| {
            OracleError::Protocol(format!("{}: no score reported for {candidate}", self.label))
        })
    }

    /// Send quit command and wait for process to exit
    async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

/// Launches [`StockfishEngine`]s with a fixed think time.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    pub think_time_ms: u64,
}

#[async_trait]
impl OracleLauncher for StockfishLauncher {
    type Oracle = StockfishEngine;

    async fn launch(&self, spec: &EngineSpec) -> Result<StockfishEngine, OracleError> {
        StockfishEngine::spawn(spec, self.think_time_ms).await
    }
}

fn io_failure(action: &str, err: io::Error) -> OracleError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => {
            OracleError::Terminated(format!("failed to {action} engine: {err}"))
        }
        _ => OracleError::Protocol(format!("failed to {action} engine: {err}")),
    }
}

/// Aspiration-window results are not final scores
fn is_bound(line: &str) -> bool {
    line.split_whitespace()
        .any(|part| part == "lowerbound" || part == "upperbound")
}

/// Parse centipawn score from info line
fn parse_cp(line: &str) -> Option<i32> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "cp" && i + 1 < parts.len() {
            return parts[i + 1].parse().ok();
        }
    }
    None
}

/// Parse mate score from info line
fn parse_mate(line: &str) -> Option<i32> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "mate" && i + 1 < parts.len() {
            return parts[i + 1].parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cp() {
        let line = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        assert_eq!(parse_cp(line), Some(35));
        assert_eq!(parse_mate(line), None);
    }

    #[test]
    fn test_parse_mate() {
        let line = "info depth 20 score mate -3 nodes 100000 pv e2e4";
        assert_eq!(parse_mate(line), Some(-3));
        assert_eq!(
            EvaluationValue::from_uci(parse_cp(line), parse_mate(line)),
            Some(EvaluationValue::from_mate(-3))
        );
    }

    #[test]
    fn test_bound_lines_are_skipped() {
        assert!(is_bound("info depth 12 score cp 40 lowerbound nodes 5000 pv d2d4"));
        assert!(!is_bound("info depth 12 score cp 40 nodes 5000 pv d2d4"));
    }

    #[test]
    fn test_io_failure_classification() {
        let died = io_failure("write to", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(died.is_recoverable());
        let odd = io_failure("read from", io::Error::from(io::ErrorKind::InvalidData));
        assert!(!odd.is_recoverable());
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let spec = EngineSpec::local("/nonexistent/stockfish-binary", vec![]);
        let err = StockfishEngine::spawn(&spec, 1).await.err().unwrap();
        assert!(matches!(err, OracleError::Launch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_exiting_during_handshake_is_launch_error() {
        let spec = EngineSpec::local("true", vec![]);
        let err = StockfishEngine::spawn(&spec, 1).await.err().unwrap();
        assert!(matches!(err, OracleError::Launch(_)), "got {err:?}");
        assert!(!err.is_recoverable());
    }
}
