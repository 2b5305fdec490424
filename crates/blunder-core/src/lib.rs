//! Pure domain logic for blunder-DNA analysis: the data model, POV score
//! arithmetic, SAN move resolution, mistake classification, and weakness
//! pattern aggregation. No I/O lives here.

pub use chess;

pub mod aggregate;
pub mod classify;
pub mod model;
pub mod san;
pub mod score;
