pub mod game_data;
pub mod pgn;

pub use game_data::{GameMetadata, GameRecord, Side};
