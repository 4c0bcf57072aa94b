use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Side of the board a player had in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
    pub date: Option<String>,
    pub utc_date: Option<String>,
    pub utc_time: Option<String>,
    pub time_control: Option<String>,
    pub variant: Option<String>,
    pub event: Option<String>,
    pub link: Option<String>,
    /// Starting position when the game did not begin from the standard setup.
    pub start_fen: Option<String>,
}

impl GameMetadata {
    /// Which side `username` played, compared case-insensitively.
    /// Lowercases the same way the stored accuracy keys and `LOWER()` filters do.
    pub fn player_side(&self, username: &str) -> Option<Side> {
        let username = username.to_lowercase();
        if self.white.to_lowercase() == username {
            Some(Side::White)
        } else if self.black.to_lowercase() == username {
            Some(Side::Black)
        } else {
            None
        }
    }

    /// When the game was played. Prefers `UTCDate`/`UTCTime`, falls back to `Date`.
    pub fn played_at(&self) -> Option<NaiveDateTime> {
        let date = self.utc_date.as_deref().or(self.date.as_deref())?;
        let date = NaiveDate::parse_from_str(date, "%Y.%m.%d").ok()?;
        let time = self
            .utc_time
            .as_deref()
            .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M:%S").ok())
            .unwrap_or(NaiveTime::MIN);
        Some(date.and_time(time))
    }
}

/// A stored game, identified by the hash of its PGN text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub hexdigest: String,
    pub metadata: GameMetadata,
    pub moves: Vec<String>, // SAN notation
    pub pgn: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> GameMetadata {
        GameMetadata {
            white: "Alice".to_string(),
            black: "bob".to_string(),
            result: "1-0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_player_side_is_case_insensitive() {
        let meta = metadata();
        assert_eq!(meta.player_side("alice"), Some(Side::White));
        assert_eq!(meta.player_side("BOB"), Some(Side::Black));
        assert_eq!(meta.player_side("carol"), None);
    }

    #[test]
    fn test_played_at_prefers_utc_headers() {
        let mut meta = metadata();
        meta.date = Some("2020.01.01".to_string());
        meta.utc_date = Some("2021.03.04".to_string());
        meta.utc_time = Some("12:30:00".to_string());

        let played = meta.played_at().unwrap();
        assert_eq!(played.to_string(), "2021-03-04 12:30:00");
    }

    #[test]
    fn test_played_at_missing_or_unknown_date() {
        let mut meta = metadata();
        assert!(meta.played_at().is_none());
        meta.date = Some("????.??.??".to_string());
        assert!(meta.played_at().is_none());
    }

    #[test]
    fn test_player_side_folds_non_ascii_capitals() {
        let meta = GameMetadata {
            white: "Ólafur".to_string(),
            black: "ÆSIR".to_string(),
            ..Default::default()
        };
        assert_eq!(meta.player_side("ólafur"), Some(Side::White));
        assert_eq!(meta.player_side("æsir"), Some(Side::Black));
        assert_eq!(meta.player_side("olafur"), None);
    }
}
