//! PGN parsing utilities: a lightweight regex-based parser.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game_data::{GameMetadata, GameRecord};

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).expect("valid header regex"));
static HEADER_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("valid header block regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("valid comment regex"));
static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?[+#]?|O-O-O|O-O|0-0-0|0-0")
        .expect("valid move regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PgnError {
    #[error("PGN has no {0} header")]
    MissingHeader(&'static str),

    #[error("PGN has no moves")]
    NoMoves,
}

/// Parse a single-game PGN string into a GameRecord.
pub fn parse_pgn(pgn: &str) -> Result<GameRecord, PgnError> {
    let mut white = None;
    let mut black = None;
    let mut metadata = GameMetadata {
        result: "*".to_string(),
        ..Default::default()
    };

    for cap in HEADER_RE.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "White" => white = Some(value),
            "Black" => black = Some(value),
            "Result" => metadata.result = value,
            "Date" => metadata.date = Some(value),
            "UTCDate" => metadata.utc_date = Some(value),
            "UTCTime" => metadata.utc_time = Some(value),
            "TimeControl" => metadata.time_control = Some(value),
            "Variant" => metadata.variant = Some(value),
            "Event" => metadata.event = Some(value),
            "Link" => metadata.link = Some(value),
            "FEN" if value != STANDARD_START_FEN => metadata.start_fen = Some(value),
            _ => {}
        }
    }

    metadata.white = white.ok_or(PgnError::MissingHeader("White"))?;
    metadata.black = black.ok_or(PgnError::MissingHeader("Black"))?;

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return Err(PgnError::NoMoves);
    }

    Ok(GameRecord {
        hexdigest: content_hash(pgn),
        metadata,
        moves,
        pgn: pgn.to_string(),
        tags: Vec::new(),
    })
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
pub fn extract_moves(pgn: &str) -> Vec<String> {
    let no_headers = HEADER_BLOCK_RE.replace_all(pgn, "");
    let no_comments = COMMENT_RE.replace_all(&no_headers, "");
    let no_variations = strip_variations(&no_comments);

    MOVE_RE
        .find_iter(&no_variations)
        .map(|m| m.as_str().replace('0', "O"))
        .collect()
}

/// Drop every parenthesized variation, however deeply nested.
fn strip_variations(movetext: &str) -> String {
    let mut depth = 0usize;
    let mut main_line = String::with_capacity(movetext.len());
    for c in movetext.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => main_line.push(c),
            _ => {}
        }
    }
    main_line
}

/// Split a multi-game PGN file into one string per game.
///
/// A new game starts at the first header line that follows movetext.
pub fn split_games(text: &str) -> Vec<String> {
    let mut games = Vec::new();
    let mut current = String::new();
    let mut seen_movetext = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && seen_movetext {
            games.push(current.trim().to_string());
            current.clear();
            seen_movetext = false;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('[') {
            seen_movetext = true;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        games.push(current.trim().to_string());
    }
    games
}

/// Hex SHA-256 of the PGN text; the identity of a stored game.
pub fn content_hash(pgn: &str) -> String {
    hex::encode(Sha256::digest(pgn.as_bytes()))
}
