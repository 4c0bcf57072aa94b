//! Replaying a game's SAN moves on a `chess::Board`

use std::str::FromStr;

use chess::{Board, ChessMove, Color, MoveGen, Piece};
use chess_core::pgn::STANDARD_START_FEN;
use chess_core::{GameRecord, Side};

/// One half-move: the position before it and the move played.
#[derive(Debug, Clone, Copy)]
pub struct Ply {
    pub board: Board,
    pub played: ChessMove,
    /// Half-moves since the last capture or pawn move
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl Ply {
    pub fn mover(&self) -> Side {
        side_of(self.board.side_to_move())
    }

    /// Full FEN with the game's real move counters; `Board` alone always prints `0 1`.
    pub fn fen(&self) -> String {
        let board = self.board.to_string();
        let placement: Vec<&str> = board.split_whitespace().take(4).collect();
        format!(
            "{} {} {}",
            placement.join(" "),
            self.halfmove_clock,
            self.fullmove_number
        )
    }
}

pub fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

/// UCI text for a move: "e2e4", "e7e8q", castling as the king move "e1g1".
pub fn uci(m: ChessMove) -> String {
    m.to_string()
}

pub fn start_board(game: &GameRecord) -> Result<Board, String> {
    let fen = game
        .metadata
        .start_fen
        .as_deref()
        .unwrap_or(STANDARD_START_FEN);
    Board::from_str(fen).map_err(|e| format!("bad start position {fen:?}: {e}"))
}

/// Move counters from the start FEN, `(0, 1)` when absent or malformed.
fn start_counters(game: &GameRecord) -> (u32, u32) {
    let Some(fen) = game.metadata.start_fen.as_deref() else {
        return (0, 1);
    };
    let mut fields = fen.split_whitespace().skip(4);
    let halfmove = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let fullmove = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1);
    (halfmove, fullmove)
}

/// Resolve every SAN move up front so an illegal move is found before any engine work.
pub fn replay(game: &GameRecord) -> Result<Vec<Ply>, String> {
    let mut board = start_board(game)?;
    let (mut halfmove_clock, mut fullmove_number) = start_counters(game);
    let mut plies = Vec::with_capacity(game.moves.len());
    for (i, san) in game.moves.iter().enumerate() {
        let played = find_san_move(&board, san).map_err(|e| format!("ply {}: {e}", i + 1))?;
        plies.push(Ply {
            board,
            played,
            halfmove_clock,
            fullmove_number,
        });

        let resets = board.piece_on(played.get_source()) == Some(Piece::Pawn)
            || board.piece_on(played.get_dest()).is_some();
        halfmove_clock = if resets { 0 } else { halfmove_clock + 1 };
        if board.side_to_move() == Color::Black {
            fullmove_number += 1;
        }
        board = board.make_move_new(played);
    }
    Ok(plies)
}

/// Legal moves in generation order.
pub fn legal_moves(board: &Board) -> Vec<ChessMove> {
    MoveGen::new_legal(board).collect()
}

pub fn find_san_move(board: &Board, san: &str) -> Result<ChessMove, String> {
    let clean = san.trim_end_matches(|c: char| c == '+' || c == '#' || c == '!' || c == '?');
    let legal = legal_moves(board);

    // Castling is a two-file king move
    if clean == "O-O" || clean == "O-O-O" {
        let kingside = clean == "O-O";
        return legal
            .into_iter()
            .find(|m| {
                let src = m.get_source().get_file().to_index() as i32;
                let dst = m.get_dest().get_file().to_index() as i32;
                board.piece_on(m.get_source()) == Some(Piece::King)
                    && if kingside { dst - src == 2 } else { src - dst == 2 }
            })
            .ok_or_else(|| format!("no castling move matches {san}"));
    }

    let bytes = clean.as_bytes();
    let Some(&first) = bytes.first() else {
        return Err("empty SAN move".to_string());
    };

    let (piece, rest) = if first.is_ascii_uppercase() {
        let piece = match first {
            b'K' => Piece::King,
            b'Q' => Piece::Queen,
            b'R' => Piece::Rook,
            b'B' => Piece::Bishop,
            b'N' => Piece::Knight,
            _ => return Err(format!("unknown piece in {san}")),
        };
        (piece, &clean[1..])
    } else {
        (Piece::Pawn, clean)
    };

    let (rest, promotion) = match rest.find('=') {
        Some(eq) => {
            let promotion = match rest.as_bytes().get(eq + 1) {
                Some(b'Q') => Some(Piece::Queen),
                Some(b'R') => Some(Piece::Rook),
                Some(b'B') => Some(Piece::Bishop),
                Some(b'N') => Some(Piece::Knight),
                _ => return Err(format!("bad promotion in {san}")),
            };
            (&rest[..eq], promotion)
        }
        None => (rest, None),
    };

    let rest = rest.replace('x', "");
    let rb = rest.as_bytes();
    if rb.len() < 2 {
        return Err(format!("SAN too short: {san}"));
    }
    let (file, rank) = (rb[rb.len() - 2], rb[rb.len() - 1]);
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return Err(format!("invalid destination in {san}"));
    }
    let dest = chess::Square::make_square(
        chess::Rank::from_index((rank - b'1') as usize),
        chess::File::from_index((file - b'a') as usize),
    );
    let disambiguation = &rb[..rb.len() - 2];

    let candidates: Vec<ChessMove> = legal
        .into_iter()
        .filter(|m| {
            let src = m.get_source();
            m.get_dest() == dest
                && board.piece_on(src) == Some(piece)
                && m.get_promotion() == promotion
                && disambiguation.iter().all(|&b| match b {
                    b'a'..=b'h' => src.get_file().to_index() == (b - b'a') as usize,
                    b'1'..=b'8' => src.get_rank().to_index() == (b - b'1') as usize,
                    _ => true,
                })
        })
        .collect();

    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(format!("no legal move matches {san}")),
        many => Err(format!("ambiguous SAN {san} ({} candidates)", many.len())),
    }
}
