//! POV and centipawn-loss arithmetic.
//!
//! Engines report scores from the side to move; everything downstream works
//! in white-POV centipawns and negates per the tracked side when computing
//! loss. Forced-mate signals are collapsed to a large finite magnitude so
//! loss arithmetic stays well-defined.

/// Magnitude substituted for a forced-mate signal.
pub const MATE_CP: i32 = 10_000;

/// Any white-POV score beyond this is treated as a mate-bearing evaluation.
pub const MATE_THRESHOLD: i32 = 9_000;

/// Collapse an engine score (side-to-move POV) to white-POV centipawns.
///
/// Mate-in-N maps to `±(MATE_CP - N)` so nearer mates dominate; `mate 0`
/// (side to move is already mated) maps to `-MATE_CP`.
pub fn to_white_cp(score_cp: Option<i32>, mate_in: Option<i32>, white_to_move: bool) -> i32 {
    let stm = if let Some(m) = mate_in {
        if m > 0 {
            MATE_CP - m
        } else {
            -MATE_CP - m
        }
    } else {
        score_cp.unwrap_or(0)
    };
    if white_to_move {
        stm
    } else {
        -stm
    }
}

/// Loss for the tracked side: `max(0, before_pov - after_pov)`.
pub fn centipawn_loss(before_white_cp: i32, after_white_cp: i32, tracked_is_white: bool) -> i32 {
    let (before, after) = if tracked_is_white {
        (before_white_cp, after_white_cp)
    } else {
        (-before_white_cp, -after_white_cp)
    };
    (before - after).max(0)
}

/// Game accuracy for the tracked side: `100 - avg_loss / 2`, clamped to
/// `0..=100`. `None` when no moves were evaluated, so an unanalyzed game
/// never reads as a perfect one.
pub fn accuracy_for_losses(losses: &[i32]) -> Option<f64> {
    if losses.is_empty() {
        return None;
    }
    let avg = losses.iter().map(|&loss| f64::from(loss)).sum::<f64>() / losses.len() as f64;
    Some((100.0 - avg / 2.0).clamp(0.0, 100.0))
}

/// A winning forced mate existed before the move and is gone after it.
pub fn missed_mate(before_white_cp: i32, after_white_cp: i32, tracked_is_white: bool) -> bool {
    let pov = |cp: i32| if tracked_is_white { cp } else { -cp };
    pov(before_white_cp) > MATE_THRESHOLD && pov(after_white_cp) <= MATE_THRESHOLD
}
