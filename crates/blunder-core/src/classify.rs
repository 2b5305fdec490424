//! Mistake classification: severity tiers and theme rules.
//!
//! The theme rules run in a fixed order and the first match wins; reordering
//! them changes how ambiguous positions classify, so the order is pinned by
//! tests. This is a deliberate heuristic, not a position-understanding
//! system.

use crate::model::{BlunderEvent, MoveRecord, Phase, Severity, Theme};

/// Severity thresholds in centipawns lost (tunable).
pub const BLUNDER_THRESHOLD: i32 = 200;
pub const MISTAKE_THRESHOLD: i32 = 100;
pub const INACCURACY_THRESHOLD: i32 = 50;

/// Last full move of the opening / middlegame, by move number. A stated
/// simplification: phase comes from the move counter, not the position.
pub const OPENING_LAST_MOVE: u32 = 15;
pub const MIDDLEGAME_LAST_MOVE: u32 = 30;

/// Position-derived inputs to the theme rules, computed by the evaluator
/// from the boards around the played move.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionFacts {
    /// Net material swing of the move in pawn units: value captured minus
    /// the best tracked piece left en prise afterwards. Negative means the
    /// move sheds material once the opponent collects.
    pub material_delta: i32,
    /// After the move, a tracked-side piece (minor or better) sits attacked
    /// and undefended.
    pub own_piece_hanging: bool,
    /// The pre-move evaluation carried a winning forced mate that the played
    /// move threw away.
    pub pv_had_mate: bool,
    /// Opponent pressure on the tracked king's zone jumped sharply.
    pub king_exposure_increased: bool,
    /// The move captured a defended piece of lower value than the capturer.
    pub losing_capture: bool,
    /// Clock was below the configured low-time threshold.
    pub under_time_pressure: bool,
}

/// A loss must strictly exceed the blunder threshold; exactly 200 is still
/// a mistake.
pub fn severity_for_loss(loss: i32) -> Option<Severity> {
    if loss > BLUNDER_THRESHOLD {
        Some(Severity::Blunder)
    } else if loss >= MISTAKE_THRESHOLD {
        Some(Severity::Mistake)
    } else if loss >= INACCURACY_THRESHOLD {
        Some(Severity::Inaccuracy)
    } else {
        None
    }
}

pub fn phase_for_move(move_number: u32) -> Phase {
    if move_number <= OPENING_LAST_MOVE {
        Phase::Opening
    } else if move_number <= MIDDLEGAME_LAST_MOVE {
        Phase::Middlegame
    } else {
        Phase::Endgame
    }
}

/// Theme rules in contract order; first match wins, `missed_threat` is the
/// fallback when nothing specific fires. The material rules only fire when
/// the move actually sheds material: a piece left attacked after an even
/// trade is a recapture waiting to happen, not a hang.
pub fn theme_for(facts: &PositionFacts) -> Theme {
    if facts.pv_had_mate {
        return Theme::MissedMate;
    }
    if facts.own_piece_hanging && facts.material_delta < 0 {
        return Theme::HangingPiece;
    }
    if facts.losing_capture && facts.material_delta < 0 {
        return Theme::LosingCapture;
    }
    if facts.king_exposure_increased {
        return Theme::KingExposure;
    }
    if facts.under_time_pressure {
        return Theme::TimeScramble;
    }
    Theme::MissedThreat
}

/// Classify one evaluated move. Returns `None` when the loss is below the
/// inaccuracy threshold and no forced mate was missed.
pub fn classify(game_id: i64, record: &MoveRecord, facts: &PositionFacts) -> Option<BlunderEvent> {
    let severity = if record.missed_mate {
        // A thrown-away forced mate is a blunder no matter the raw loss.
        Severity::Blunder
    } else {
        severity_for_loss(record.centipawn_loss)?
    };

    Some(BlunderEvent {
        game_id,
        ply: record.ply,
        move_number: record.move_number,
        played_move: record.played_move.clone(),
        best_move: record.best_move.clone(),
        centipawn_loss: record.centipawn_loss,
        severity,
        theme: theme_for(facts),
        phase: phase_for_move(record.move_number),
    })
}
