//! Evaluation oracle seam: what an engine must answer and how one is launched.

use std::fmt;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::score::EvaluationValue;

/// Where an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Local,
    Remote,
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Local => f.write_str("local"),
            ResourceClass::Remote => f.write_str("remote"),
        }
    }
}

/// How to start one engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub class: ResourceClass,
    /// Human-readable name used in logs (binary path or remote address)
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    /// UCI `setoption` name/value pairs sent after the handshake
    pub options: Vec<(String, String)>,
}

impl EngineSpec {
    pub fn local(path: &str, options: Vec<(String, String)>) -> Self {
        Self {
            class: ResourceClass::Local,
            label: path.to_string(),
            program: path.to_string(),
            args: Vec::new(),
            options,
        }
    }

    /// Engine reached through `ssh <address> <command>`.
    pub fn remote(address: &str, command: &str, options: Vec<(String, String)>) -> Self {
        Self {
            class: ResourceClass::Remote,
            label: address.to_string(),
            program: "ssh".to_string(),
            args: vec![address.to_string(), command.to_string()],
            options,
        }
    }
}

/// One engine that can score a single candidate move.
#[async_trait]
pub trait Oracle: Send + 'static {
    /// Score `candidate` (UCI) in `fen`, with the search restricted to that move only.
    async fn evaluate(&mut self, fen: &str, candidate: &str) -> Result<EvaluationValue, OracleError>;

    /// Best-effort shutdown of the underlying process.
    async fn quit(&mut self);
}

/// Starts engines for the arbiter's slots on first use.
#[async_trait]
pub trait OracleLauncher: Send + Sync + 'static {
    type Oracle: Oracle;

    async fn launch(&self, spec: &EngineSpec) -> Result<Self::Oracle, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_spec_goes_through_ssh() {
        let spec = EngineSpec::remote("user@10.0.0.2", "stockfish", vec![]);
        assert_eq!(spec.class, ResourceClass::Remote);
        assert_eq!(spec.program, "ssh");
        assert_eq!(spec.args, vec!["user@10.0.0.2", "stockfish"]);
        assert_eq!(spec.label, "user@10.0.0.2");
    }
}
