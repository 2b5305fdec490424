//! Board feature extraction feeding the theme classifier.
//!
//! Everything here is computed from the positions around a single played
//! move; no engine calls. Attack detection uses the move generator's
//! lookup tables plus a hand-rolled pawn-attacker mask.

use chess::{
    get_bishop_moves, get_king_moves, get_knight_moves, get_rook_moves, BitBoard, Board,
    ChessMove, Color, File, Piece, Rank, Square, EMPTY,
};

use blunder_core::classify::PositionFacts;

/// Pressure jump on the tracked king's zone that counts as new exposure.
const KING_PRESSURE_JUMP: u32 = 3;

/// Conventional material values in pawn units. The king scores zero; it is
/// never counted as material or as a hangable piece.
pub fn piece_value(piece: Piece) -> i32 {
    match piece {
        Piece::Pawn => 1,
        Piece::Knight | Piece::Bishop => 3,
        Piece::Rook => 5,
        Piece::Queen => 9,
        Piece::King => 0,
    }
}

/// Pawns of `by` that attack `sq`.
fn pawn_attackers(board: &Board, by: Color, sq: Square) -> BitBoard {
    let rank = sq.get_rank().to_index() as i32;
    let file = sq.get_file().to_index() as i32;
    let pawn_rank = match by {
        Color::White => rank - 1,
        Color::Black => rank + 1,
    };

    let mut mask = EMPTY;
    if (0..8).contains(&pawn_rank) {
        for df in [-1, 1] {
            let pawn_file = file + df;
            if (0..8).contains(&pawn_file) {
                let from = Square::make_square(
                    Rank::from_index(pawn_rank as usize),
                    File::from_index(pawn_file as usize),
                );
                mask |= BitBoard::from_square(from);
            }
        }
    }
    mask & *board.pieces(Piece::Pawn) & *board.color_combined(by)
}

/// All pieces of `by` attacking `sq`, through the current occupancy.
pub fn attackers(board: &Board, by: Color, sq: Square) -> BitBoard {
    let occupied = *board.combined();

    let mut hits = get_knight_moves(sq) & *board.pieces(Piece::Knight);
    hits |= get_king_moves(sq) & *board.pieces(Piece::King);
    hits |= get_rook_moves(sq, occupied)
        & (*board.pieces(Piece::Rook) | *board.pieces(Piece::Queen));
    hits |= get_bishop_moves(sq, occupied)
        & (*board.pieces(Piece::Bishop) | *board.pieces(Piece::Queen));

    (hits & *board.color_combined(by)) | pawn_attackers(board, by, sq)
}

/// Total material for one side, in pawn units.
pub fn material_count(board: &Board, color: Color) -> i32 {
    let mut total = 0;
    for sq in *board.color_combined(color) {
        if let Some(piece) = board.piece_on(sq) {
            total += piece_value(piece);
        }
    }
    total
}

/// True when any tracked piece of minor value or better stands attacked with
/// no defender.
pub fn own_piece_hanging(board: &Board, tracked: Color) -> bool {
    for sq in *board.color_combined(tracked) {
        let piece = match board.piece_on(sq) {
            Some(p) => p,
            None => continue,
        };
        if piece == Piece::King || piece_value(piece) < 3 {
            continue;
        }
        if attackers(board, !tracked, sq) != EMPTY && attackers(board, tracked, sq) == EMPTY {
            return true;
        }
    }
    false
}

/// Value of the most expensive tracked piece (minor or better) left en
/// prise: attacked with no defender, or attacked by a strictly cheaper
/// piece, where defenders do not help.
pub fn material_at_risk(board: &Board, tracked: Color) -> i32 {
    let mut at_risk = 0;
    for sq in *board.color_combined(tracked) {
        let piece = match board.piece_on(sq) {
            Some(p) => p,
            None => continue,
        };
        if piece == Piece::King || piece_value(piece) < 3 {
            continue;
        }
        let attacked_by = attackers(board, !tracked, sq);
        if attacked_by == EMPTY {
            continue;
        }
        let cheapest_attacker = attacked_by
            .filter_map(|from| board.piece_on(from))
            .map(piece_value)
            .min()
            .unwrap_or(0);
        let undefended = attackers(board, tracked, sq) == EMPTY;
        if undefended || cheapest_attacker < piece_value(piece) {
            at_risk = at_risk.max(piece_value(piece));
        }
    }
    at_risk
}

/// Opponent attacks aimed into the king's square and its neighborhood.
pub fn king_zone_pressure(board: &Board, defender: Color) -> u32 {
    let king_sq = (*board.pieces(Piece::King) & *board.color_combined(defender)).to_square();
    let zone = BitBoard::from_square(king_sq) | get_king_moves(king_sq);

    let mut pressure = 0;
    for sq in zone {
        pressure += attackers(board, !defender, sq).popcnt();
    }
    pressure
}

fn king_exposure_increased(before: &Board, after: &Board, tracked: Color) -> bool {
    king_zone_pressure(after, tracked) >= king_zone_pressure(before, tracked) + KING_PRESSURE_JUMP
}

/// A capture of a defended piece worth less than the capturer.
pub fn losing_capture(board_before: &Board, mv: ChessMove) -> bool {
    let capturer = match board_before.piece_on(mv.get_source()) {
        Some(p) => p,
        None => return false,
    };
    let captured = match board_before.piece_on(mv.get_dest()) {
        Some(p) => p,
        None => return false,
    };
    let mover = match board_before.color_on(mv.get_source()) {
        Some(c) => c,
        None => return false,
    };

    piece_value(captured) < piece_value(capturer)
        && attackers(board_before, !mover, mv.get_dest()) != EMPTY
}

/// Assemble the classifier inputs for one tracked move.
pub fn position_facts(
    board_before: &Board,
    board_after: &Board,
    mv: ChessMove,
    tracked: Color,
    missed_mate: bool,
    under_time_pressure: bool,
) -> PositionFacts {
    let balance =
        |board: &Board| material_count(board, tracked) - material_count(board, !tracked);

    PositionFacts {
        // Captured value minus what the move leaves en prise.
        material_delta: balance(board_after) - balance(board_before)
            - material_at_risk(board_after, tracked),
        own_piece_hanging: own_piece_hanging(board_after, tracked),
        pv_had_mate: missed_mate,
        king_exposure_increased: king_exposure_increased(board_before, board_after, tracked),
        losing_capture: losing_capture(board_before, mv),
        under_time_pressure,
    }
}
