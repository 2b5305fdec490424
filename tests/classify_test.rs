//! Integration tests for the classification pipeline: board facts feeding
//! theme rules, and classified events feeding the pattern aggregation.

use std::str::FromStr;

use chrono::Utc;

use analysis_worker::facts::position_facts;
use blunder_core::aggregate::{aggregate, BLUNDER_WEIGHT, MISTAKE_WEIGHT};
use blunder_core::chess::{Board, Color};
use blunder_core::classify::{classify, PositionFacts};
use blunder_core::model::{MoveRecord, Phase, Severity, Theme};
use blunder_core::san::parse_san;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record(ply: u32, san: &str, loss: i32) -> MoveRecord {
    MoveRecord {
        ply,
        move_number: (ply + 1) / 2,
        played_move: san.to_string(),
        best_move: "d2d4".to_string(),
        eval_before_cp: 100,
        eval_after_cp: 100 - loss,
        centipawn_loss: loss,
        missed_mate: false,
    }
}

// ---------------------------------------------------------------------------
// Facts to events
// ---------------------------------------------------------------------------

#[test]
fn a_queen_left_en_prise_classifies_as_a_hanging_piece_blunder() {
    // White's 10th move walks the queen to d3, where the d8 rook attacks it
    // with nothing defending. The engine scored the move 900cp worse.
    let before = Board::from_str("3r3k/8/8/8/8/8/3Q4/7K w - - 0 10").unwrap();
    let mv = parse_san(&before, "Qd3").unwrap();
    let after = before.make_move_new(mv);

    let facts = position_facts(&before, &after, mv, Color::White, false, false);
    assert!(facts.own_piece_hanging);

    let event = classify(42, &record(19, "Qd3", 900), &facts).unwrap();
    assert_eq!(event.game_id, 42);
    assert_eq!(event.severity, Severity::Blunder);
    assert_eq!(event.theme, Theme::HangingPiece);
    assert_eq!(event.phase, Phase::Opening);
    assert_eq!(event.move_number, 10);
    assert_eq!(event.centipawn_loss, 900);
}

#[test]
fn a_quiet_move_with_small_loss_produces_no_event() {
    let before = Board::default();
    let mv = parse_san(&before, "e4").unwrap();
    let after = before.make_move_new(mv);

    let facts = position_facts(&before, &after, mv, Color::White, false, false);
    assert!(classify(1, &record(1, "e4", 20), &facts).is_none());
}

#[test]
fn a_losing_capture_outranks_time_pressure() {
    // Queen takes a pawn defended by another pawn, while low on the clock.
    // The e1 rook covers the queen, so the hanging-piece rule stays quiet.
    let before = Board::from_str("7k/8/5p2/4p3/3Q4/8/8/4R2K w - - 0 40").unwrap();
    let mv = parse_san(&before, "Qxe5").unwrap();
    let after = before.make_move_new(mv);

    let facts = position_facts(&before, &after, mv, Color::White, false, true);
    assert!(facts.losing_capture);
    assert!(facts.under_time_pressure);

    let event = classify(1, &record(79, "Qxe5", 450), &facts).unwrap();
    assert_eq!(event.theme, Theme::LosingCapture);
    assert_eq!(event.phase, Phase::Endgame);
}

#[test]
fn a_queen_trade_does_not_classify_as_a_hanging_piece() {
    // Qxd5 wins the queen before the d7 rook recaptures. The queen stands
    // attacked and undefended, but the material is already recouped, so the
    // hanging rule stays quiet and the loss falls through to the fallback.
    let before = Board::from_str("7k/3r4/8/3q4/8/8/3Q4/7K w - - 0 20").unwrap();
    let mv = parse_san(&before, "Qxd5").unwrap();
    let after = before.make_move_new(mv);

    let facts = position_facts(&before, &after, mv, Color::White, false, false);
    assert!(facts.own_piece_hanging);
    assert_eq!(facts.material_delta, 0);

    let event = classify(7, &record(39, "Qxd5", 220), &facts).unwrap();
    assert_eq!(event.theme, Theme::MissedThreat);
    assert_eq!(event.severity, Severity::Blunder);
}

#[test]
fn time_pressure_is_the_theme_when_nothing_tactical_fires() {
    let facts = PositionFacts {
        under_time_pressure: true,
        ..PositionFacts::default()
    };
    let event = classify(1, &record(61, "Kg1", 150), &facts).unwrap();
    assert_eq!(event.severity, Severity::Mistake);
    assert_eq!(event.theme, Theme::TimeScramble);
}

// ---------------------------------------------------------------------------
// Events to patterns
// ---------------------------------------------------------------------------

#[test]
fn repeated_hanging_pieces_dominate_the_weakness_ranking() {
    let hanging = PositionFacts {
        own_piece_hanging: true,
        material_delta: -9,
        ..PositionFacts::default()
    };
    let quiet = PositionFacts::default();

    let events = vec![
        classify(1, &record(19, "Qd3", 900), &hanging).unwrap(),
        classify(2, &record(33, "Nd5", 300), &hanging).unwrap(),
        classify(3, &record(25, "h3", 120), &quiet).unwrap(),
    ];

    let patterns = aggregate(&events, Utc::now());
    assert_eq!(patterns.len(), 2);
    assert_eq!(patterns[0].pattern_tag, "hanging_piece");
    assert_eq!(patterns[0].occurrences, 2);
    assert_eq!(patterns[0].weakness_score, 2.0 * BLUNDER_WEIGHT);
    assert_eq!(patterns[1].pattern_tag, "missed_threat");
    assert_eq!(patterns[1].weakness_score, MISTAKE_WEIGHT);
    assert!(patterns[0].weakness_score > patterns[1].weakness_score);
}
