//! SAN move resolution against a position's legal moves.
//!
//! Rather than parsing SAN, each legal move is rendered to SAN and matched
//! against the (cleaned) input, so disambiguation always agrees with the
//! move generator.

use chess::{Board, ChessMove, MoveGen, Piece, Square};

/// Resolve a SAN string to a legal move in `board`.
/// Check/mate/annotation suffixes (`+`, `#`, `!`, `?`) are tolerated, as is
/// zero-style castling notation.
pub fn parse_san(board: &Board, san: &str) -> Option<ChessMove> {
    let wanted = clean(san);
    if wanted.is_empty() {
        return None;
    }
    MoveGen::new_legal(board).find(|m| render(board, *m) == wanted)
}

fn clean(san: &str) -> String {
    let stripped: String = san
        .chars()
        .filter(|c| !matches!(c, '+' | '#' | '!' | '?'))
        .collect();
    stripped.replace("0-0-0", "O-O-O").replace("0-0", "O-O")
}

/// Render a legal move as SAN (without check/mate suffixes).
fn render(board: &Board, m: ChessMove) -> String {
    let src = m.get_source();
    let dest = m.get_dest();
    let piece = match board.piece_on(src) {
        Some(p) => p,
        None => return String::new(),
    };

    if piece == Piece::King {
        let delta = dest.get_file().to_index() as i32 - src.get_file().to_index() as i32;
        if delta == 2 {
            return "O-O".to_string();
        }
        if delta == -2 {
            return "O-O-O".to_string();
        }
    }

    // En passant shows up as a pawn changing file onto an empty square.
    let is_capture = board.piece_on(dest).is_some()
        || (piece == Piece::Pawn && src.get_file() != dest.get_file());

    let mut out = String::new();
    if piece == Piece::Pawn {
        if is_capture {
            out.push(file_char(src));
            out.push('x');
        }
        out.push_str(&dest.to_string());
    } else {
        out.push(piece_char(piece));
        out.push_str(&disambiguation(board, m, piece));
        if is_capture {
            out.push('x');
        }
        out.push_str(&dest.to_string());
    }

    if let Some(promo) = m.get_promotion() {
        out.push('=');
        out.push(piece_char(promo));
    }
    out
}

fn disambiguation(board: &Board, m: ChessMove, piece: Piece) -> String {
    let src = m.get_source();
    let rivals: Vec<Square> = MoveGen::new_legal(board)
        .filter(|other| {
            other.get_dest() == m.get_dest()
                && other.get_source() != src
                && board.piece_on(other.get_source()) == Some(piece)
        })
        .map(|other| other.get_source())
        .collect();

    if rivals.is_empty() {
        String::new()
    } else if rivals.iter().all(|r| r.get_file() != src.get_file()) {
        file_char(src).to_string()
    } else if rivals.iter().all(|r| r.get_rank() != src.get_rank()) {
        rank_char(src).to_string()
    } else {
        format!("{}{}", file_char(src), rank_char(src))
    }
}

fn piece_char(piece: Piece) -> char {
    match piece {
        Piece::King => 'K',
        Piece::Queen => 'Q',
        Piece::Rook => 'R',
        Piece::Bishop => 'B',
        Piece::Knight => 'N',
        Piece::Pawn => 'P',
    }
}

fn file_char(sq: Square) -> char {
    (b'a' + sq.get_file().to_index() as u8) as char
}

fn rank_char(sq: Square) -> char {
    (b'1' + sq.get_rank().to_index() as u8) as char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn apply(board: Board, san: &str) -> Board {
        let m = parse_san(&board, san).unwrap_or_else(|| panic!("no legal move for {san}"));
        board.make_move_new(m)
    }

    #[test]
    fn resolves_pawn_and_piece_moves() {
        let board = Board::default();
        let e4 = parse_san(&board, "e4").unwrap();
        assert_eq!(e4.get_source().to_string(), "e2");
        assert_eq!(e4.get_dest().to_string(), "e4");

        let board = board.make_move_new(e4);
        let board = apply(board, "e5");
        let nf3 = parse_san(&board, "Nf3").unwrap();
        assert_eq!(nf3.get_source().to_string(), "g1");
        assert_eq!(nf3.get_dest().to_string(), "f3");
    }

    #[test]
    fn tolerates_suffixes_and_zero_castling() {
        let mut board = Board::default();
        for san in ["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"] {
            board = apply(board, san);
        }
        assert!(parse_san(&board, "O-O").is_some());
        assert!(parse_san(&board, "0-0").is_some());

        let board = Board::default();
        assert!(parse_san(&board, "e4!?").is_some());
    }

    #[test]
    fn resolves_pawn_captures_with_file_prefix() {
        let mut board = Board::default();
        for san in ["e4", "d5"] {
            board = apply(board, san);
        }
        let capture = parse_san(&board, "exd5").unwrap();
        assert_eq!(capture.get_source().to_string(), "e4");
        assert_eq!(capture.get_dest().to_string(), "d5");
        // Plain "d5" is not a capture from e4.
        assert!(parse_san(&board, "d5").is_none());
    }

    #[test]
    fn resolves_promotions() {
        let board = Board::from_str("8/P6k/8/8/8/8/8/7K w - - 0 1").unwrap();
        let promo = parse_san(&board, "a8=Q").unwrap();
        assert_eq!(promo.get_promotion(), Some(Piece::Queen));
        let under = parse_san(&board, "a8=N").unwrap();
        assert_eq!(under.get_promotion(), Some(Piece::Knight));
    }

    #[test]
    fn respects_file_disambiguation() {
        // Rooks on a1 and f1 can both reach d1.
        let board = Board::from_str("7k/8/8/8/8/8/8/R4R1K w - - 0 1").unwrap();
        let rad1 = parse_san(&board, "Rad1").unwrap();
        assert_eq!(rad1.get_source().to_string(), "a1");
        let rfd1 = parse_san(&board, "Rfd1").unwrap();
        assert_eq!(rfd1.get_source().to_string(), "f1");
        // Bare "Rd1" is ambiguous here and must not resolve.
        assert!(parse_san(&board, "Rd1").is_none());
    }
}
