//! Folds blunder events into ranked per-theme weakness summaries.
//!
//! Always a full recompute over the event set: the scoring function stays
//! simple and auditable, and identical inputs always produce the identical
//! ordered output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{BlunderEvent, PatternSummary, Severity, Theme};

/// Severity weights feeding the weakness score (tunable).
pub const INACCURACY_WEIGHT: f64 = 1.0;
pub const MISTAKE_WEIGHT: f64 = 2.5;
pub const BLUNDER_WEIGHT: f64 = 5.0;

pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Inaccuracy => INACCURACY_WEIGHT,
        Severity::Mistake => MISTAKE_WEIGHT,
        Severity::Blunder => BLUNDER_WEIGHT,
    }
}

/// Weakness score = sum of severity weights within a theme, i.e.
/// occurrences x mean severity weight. Monotonic in both occurrence count
/// and severity.
///
/// Output order: weakness score desc, then occurrences desc, then pattern
/// tag asc, so ties resolve deterministically.
pub fn aggregate(events: &[BlunderEvent], now: DateTime<Utc>) -> Vec<PatternSummary> {
    let mut groups: BTreeMap<Theme, (u32, f64)> = BTreeMap::new();
    for event in events {
        let entry = groups.entry(event.theme).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += severity_weight(event.severity);
    }

    let mut summaries: Vec<PatternSummary> = groups
        .into_iter()
        .map(|(theme, (occurrences, weakness_score))| PatternSummary {
            pattern_tag: theme.tag().to_string(),
            label: theme.label().to_string(),
            occurrences,
            weakness_score,
            updated_at: now,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.weakness_score
            .partial_cmp(&a.weakness_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.occurrences.cmp(&a.occurrences))
            .then(a.pattern_tag.cmp(&b.pattern_tag))
    });
    summaries
}
