//! Game replay and per-move evaluation.
//!
//! Walks a game's SAN moves from the starting position, probing the engine
//! before and after each tracked-side move. Opponent plies are applied
//! without engine calls. A timed-out probe skips that ply rather than
//! failing the game; any other engine error aborts the job.

use chess::{Board, Color};
use tracing::warn;

use blunder_core::classify::PositionFacts;
use blunder_core::model::{Evaluation, MoveInput, MoveRecord};
use blunder_core::san::parse_san;
use blunder_core::score;

use crate::engine::PositionEngine;
use crate::error::{EngineError, WorkerError};
use crate::facts::position_facts;

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    /// Engine search budget per position.
    pub movetime_ms: u64,
    /// Clock reading below which a move counts as played under time pressure.
    pub low_time_threshold_ms: u32,
}

/// One evaluated tracked-side move, ready for classification.
#[derive(Debug, Clone)]
pub struct EvaluatedMove {
    pub record: MoveRecord,
    pub facts: PositionFacts,
}

async fn probe<E: PositionEngine>(
    engine: &mut E,
    fen: &str,
    movetime_ms: u64,
    ply: u32,
) -> Result<Option<Evaluation>, WorkerError> {
    match engine.evaluate(fen, movetime_ms).await {
        Ok(eval) => Ok(Some(eval)),
        Err(EngineError::Timeout(ms)) => {
            warn!(ply, movetime_ms = ms, "evaluation timed out, skipping ply");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Evaluate every tracked-side move of a game.
///
/// Returns one `EvaluatedMove` per tracked ply that produced both a before
/// and after evaluation; timed-out plies are absent from the output.
pub async fn analyze_game<E: PositionEngine>(
    engine: &mut E,
    moves: &[MoveInput],
    tracked_is_white: bool,
    opts: EvalOptions,
) -> Result<Vec<EvaluatedMove>, WorkerError> {
    let tracked = if tracked_is_white {
        Color::White
    } else {
        Color::Black
    };

    let mut board = Board::default();
    let mut evaluated = Vec::new();

    for (idx, input) in moves.iter().enumerate() {
        let ply = (idx + 1) as u32;
        let mv = parse_san(&board, &input.san).ok_or_else(|| {
            WorkerError::Analysis(format!("illegal move '{}' at ply {ply}", input.san))
        })?;

        if board.side_to_move() != tracked {
            board = board.make_move_new(mv);
            continue;
        }

        let eval_before = match probe(engine, &board.to_string(), opts.movetime_ms, ply).await? {
            Some(eval) => eval,
            None => {
                board = board.make_move_new(mv);
                continue;
            }
        };

        let board_after = board.make_move_new(mv);
        let eval_after =
            match probe(engine, &board_after.to_string(), opts.movetime_ms, ply).await? {
                Some(eval) => eval,
                None => {
                    board = board_after;
                    continue;
                }
            };

        let before_cp = score::to_white_cp(
            eval_before.score_cp,
            eval_before.mate_in,
            board.side_to_move() == Color::White,
        );
        let after_cp = score::to_white_cp(
            eval_after.score_cp,
            eval_after.mate_in,
            board_after.side_to_move() == Color::White,
        );
        let loss = score::centipawn_loss(before_cp, after_cp, tracked_is_white);
        let missed = score::missed_mate(before_cp, after_cp, tracked_is_white);
        let under_time_pressure = input
            .clock_ms
            .is_some_and(|clock| clock < opts.low_time_threshold_ms);

        let facts = position_facts(
            &board,
            &board_after,
            mv,
            tracked,
            missed,
            under_time_pressure,
        );

        evaluated.push(EvaluatedMove {
            record: MoveRecord {
                ply,
                move_number: (ply + 1) / 2,
                played_move: input.san.clone(),
                best_move: eval_before.best_move.clone(),
                eval_before_cp: before_cp,
                eval_after_cp: after_cp,
                centipawn_loss: loss,
                missed_mate: missed,
            },
            facts,
        });
        board = board_after;
    }

    Ok(evaluated)
}
