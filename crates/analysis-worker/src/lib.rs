pub use chess;

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod facts;
pub mod queue;
pub mod snapshot;
pub mod worker;
