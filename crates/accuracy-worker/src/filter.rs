//! Which games a run looks at.

use chess_core::{GameRecord, Side};
use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorFilter {
    White,
    Black,
    #[default]
    Any,
}

impl ColorFilter {
    pub fn side(self) -> Option<Side> {
        match self {
            ColorFilter::White => Some(Side::White),
            ColorFilter::Black => Some(Side::Black),
            ColorFilter::Any => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameFilter {
    pub username: String,
    pub color: ColorFilter,
    /// Inclusive bounds on when the game was played
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    /// Empty means any time control
    pub time_controls: Vec<String>,
    /// Empty means any variant
    pub variants: Vec<String>,
    pub limit: Option<u64>,
    /// Skip games already flagged invalid for this analysis type
    pub exclude_invalid_for: Option<String>,
}

impl GameFilter {
    pub fn for_user(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }

    /// Header-level match. Limit and invalid flags are the store's job.
    pub fn matches(&self, game: &GameRecord) -> bool {
        let meta = &game.metadata;
        let Some(side) = meta.player_side(&self.username) else {
            return false;
        };
        if let Some(wanted) = self.color.side() {
            if wanted != side {
                return false;
            }
        }

        if self.start.is_some() || self.end.is_some() {
            let Some(played_at) = meta.played_at() else {
                return false;
            };
            if self.start.is_some_and(|start| played_at < start) {
                return false;
            }
            if self.end.is_some_and(|end| played_at > end) {
                return false;
            }
        }

        if !self.time_controls.is_empty()
            && !meta
                .time_control
                .as_ref()
                .is_some_and(|tc| self.time_controls.contains(tc))
        {
            return false;
        }

        if !self.variants.is_empty()
            && !meta
                .variant
                .as_ref()
                .is_some_and(|v| self.variants.contains(v))
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use chess_core::GameMetadata;
    use chrono::NaiveDate;

    use super::*;

    fn game(white: &str, black: &str, date: &str, tc: &str) -> GameRecord {
        GameRecord {
            hexdigest: format!("{white}-{black}-{date}"),
            metadata: GameMetadata {
                white: white.to_string(),
                black: black.to_string(),
                result: "*".to_string(),
                utc_date: Some(date.to_string()),
                time_control: Some(tc.to_string()),
                ..Default::default()
            },
            moves: vec!["e4".to_string()],
            pgn: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_username_and_color() {
        let g = game("alice", "bob", "2024.01.01", "600");
        let mut filter = GameFilter::for_user("Alice");
        assert!(filter.matches(&g));
        filter.color = ColorFilter::Black;
        assert!(!filter.matches(&g));
        assert!(!GameFilter::for_user("carol").matches(&g));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let g = game("alice", "bob", "2024.03.10", "600");
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut filter = GameFilter::for_user("alice");
        filter.start = Some(day(10));
        filter.end = Some(day(10));
        assert!(filter.matches(&g));
        filter.start = Some(day(11));
        filter.end = None;
        assert!(!filter.matches(&g));
    }

    #[test]
    fn test_time_control_and_variant_allow_lists() {
        let g = game("alice", "bob", "2024.01.01", "180+2");
        let mut filter = GameFilter::for_user("alice");
        filter.time_controls = vec!["600".to_string(), "180+2".to_string()];
        assert!(filter.matches(&g));
        filter.time_controls = vec!["600".to_string()];
        assert!(!filter.matches(&g));

        filter.time_controls.clear();
        filter.variants = vec!["Chess960".to_string()];
        assert!(!filter.matches(&g), "no Variant header never matches an allow-list");
    }
}
