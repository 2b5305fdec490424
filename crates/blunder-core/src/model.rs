//! Core data model shared by the worker, the queue, and the snapshot layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    /// Stable lowercase form used in the job store.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One queued game analysis.
///
/// Identity key = `(game_id, engine_name, analysis_depth)`; the store
/// guarantees at most one `Processing` row per key. `attempts` counts claims,
/// not staleness sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: i64,
    pub game_id: i64,
    pub engine_name: String,
    pub analysis_depth: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Result of a single engine probe, in side-to-move POV.
/// Exactly one of `score_cp` / `mate_in` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub score_cp: Option<i32>,
    pub mate_in: Option<i32>,
    pub best_move: String,
    pub pv: Vec<String>,
    pub depth_reached: i32,
}

/// Per-tracked-ply evaluation record.
///
/// Evals are raw white-POV centipawns; forced-mate signals are substituted
/// with a large finite magnitude (see `score::to_white_cp`) and the record is
/// flagged via `missed_mate` when a winning mate was thrown away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub ply: u32,
    pub move_number: u32,
    pub played_move: String,
    pub best_move: String,
    pub eval_before_cp: i32,
    pub eval_after_cp: i32,
    pub centipawn_loss: i32,
    pub missed_mate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Inaccuracy,
    Mistake,
    Blunder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Opening,
    Middlegame,
    Endgame,
}

/// Mistake themes, in no particular order here; the classifier's rule order
/// is what decides ambiguous positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    MissedMate,
    HangingPiece,
    LosingCapture,
    KingExposure,
    TimeScramble,
    MissedThreat,
}

impl Theme {
    /// Stable tag used for persistence and pattern ranking.
    pub fn tag(&self) -> &'static str {
        match self {
            Theme::MissedMate => "missed_mate",
            Theme::HangingPiece => "hanging_piece",
            Theme::LosingCapture => "losing_capture",
            Theme::KingExposure => "king_exposure",
            Theme::TimeScramble => "time_scramble",
            Theme::MissedThreat => "missed_threat",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Theme::MissedMate => "Missed forced mates",
            Theme::HangingPiece => "Hanging pieces",
            Theme::LosingCapture => "Losing captures",
            Theme::KingExposure => "King exposure",
            Theme::TimeScramble => "Time scrambles",
            Theme::MissedThreat => "Missed threats",
        }
    }
}

/// One classified mistake. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlunderEvent {
    pub game_id: i64,
    pub ply: u32,
    pub move_number: u32,
    pub played_move: String,
    pub best_move: String,
    pub centipawn_loss: i32,
    pub severity: Severity,
    pub theme: Theme,
    pub phase: Phase,
}

/// Per-theme weakness summary, recomputed in full from the event set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub pattern_tag: String,
    pub label: String,
    pub occurrences: u32,
    pub weakness_score: f64,
    pub updated_at: DateTime<Utc>,
}

/// A subject's blunder-DNA snapshot, valid until `ttl_expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub subject_id: i64,
    pub computed_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
    pub games_analyzed: u32,
    pub blunders_total: u32,
    pub patterns: Vec<PatternSummary>,
}

/// Input move for game replay. `clock_ms` is the clock remaining after the
/// move, when the game source provides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveInput {
    pub san: String,
    #[serde(default)]
    pub clock_ms: Option<u32>,
}
