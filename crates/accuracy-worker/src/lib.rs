//! Per-move accuracy of chess games.
//!
//! Every move a player made is ranked against all legal alternatives by a
//! UCI engine, and its rank becomes a percentile. Engine scores are cached per
//! (position, move, schema version) so repeated runs only pay for new
//! positions, and engine processes are shared between concurrent games through
//! a [`arbiter::ResourceArbiter`].

pub use chess;

pub mod accuracy;
pub mod arbiter;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod import;
pub mod oracle;
pub mod per_piece;
pub mod ranking;
pub mod replay;
pub mod scheduler;
pub mod score;
pub mod stockfish;
pub mod store;
