//! UCI engine process adapter (async line protocol).
//!
//! One handle drives one engine process; concurrent evaluations need
//! separate handles. The lifecycle is an explicit state machine,
//! starting -> ready -> evaluating -> (ready | crashed), so callers and
//! tests can reason about crash recovery instead of probing a dead pipe.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use blunder_core::model::Evaluation;

use crate::error::EngineError;

/// Extra wall time allowed beyond `go movetime` before declaring a timeout.
const DEADLINE_GRACE_MS: u64 = 2_000;
/// Budget for the initial UCI handshake.
const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Budget for draining a timed-out search back to `bestmove`.
const RESYNC_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Ready,
    Evaluating,
    Crashed,
}

/// Seam between the position evaluator and the engine, so tests can drive
/// the game walk with a scripted engine instead of a real process.
#[allow(async_fn_in_trait)]
pub trait PositionEngine {
    async fn evaluate(&mut self, fen: &str, movetime_ms: u64) -> Result<Evaluation, EngineError>;
}

/// A spawned UCI engine process.
#[derive(Debug)]
pub struct UciEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    state: EngineState,
}

impl UciEngine {
    /// Spawn the engine and complete the UCI handshake.
    /// Any failure here surfaces as `EngineError::Unavailable`.
    pub async fn start(path: &str) -> Result<Self, EngineError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("failed to spawn {path}: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdin unavailable".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout unavailable".to_string()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout),
            state: EngineState::Starting,
        };

        let handshake = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
        match tokio::time::timeout(handshake, engine.handshake()).await {
            Ok(Ok(())) => {
                engine.state = EngineState::Ready;
                Ok(engine)
            }
            Ok(Err(e)) => Err(EngineError::Unavailable(format!("handshake failed: {e}"))),
            Err(_) => Err(EngineError::Unavailable("handshake timed out".to_string())),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        self.send("setoption name Threads value 1").await?;
        self.send("setoption name UCI_AnalyseMode value true").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "engine <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Crashed(format!("failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Crashed(format!("failed to flush engine stdin: {e}")))
    }

    /// Read one line; EOF means the process is gone.
    async fn read_line(&mut self) -> Result<String, EngineError> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::Crashed(format!("failed to read from engine: {e}")))?;
        if n == 0 {
            return Err(EngineError::Crashed("engine closed stdout".to_string()));
        }
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "engine >");
        Ok(trimmed)
    }

    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        loop {
            if self.read_line().await? == expected {
                return Ok(());
            }
        }
    }

    /// Run one search and parse the last scored info line before `bestmove`.
    async fn search(&mut self, fen: &str, movetime_ms: u64) -> Result<Evaluation, EngineError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go movetime {movetime_ms}")).await?;

        let mut score_cp = None;
        let mut mate_in = None;
        let mut pv = Vec::new();
        let mut depth_reached = 0;

        loop {
            let line = self.read_line().await?;
            if line.starts_with("info") && line.contains(" pv ") {
                if let Some(cp) = parse_cp(&line) {
                    score_cp = Some(cp);
                    mate_in = None;
                }
                if let Some(mate) = parse_mate(&line) {
                    mate_in = Some(mate);
                    score_cp = None;
                }
                if let Some(depth) = parse_depth(&line) {
                    depth_reached = depth;
                }
                pv = parse_pv(&line);
            } else if line.starts_with("bestmove") {
                if score_cp.is_none() && mate_in.is_none() {
                    // Search ended without a single scored line.
                    return Err(EngineError::Timeout(movetime_ms));
                }
                let best_move = line.split_whitespace().nth(1).unwrap_or("").to_string();
                return Ok(Evaluation {
                    score_cp,
                    mate_in,
                    best_move,
                    pv,
                    depth_reached,
                });
            }
        }
    }

    /// After a missed deadline, stop the search and drain to `bestmove` so
    /// the handle can serve the next position. If the engine stays silent,
    /// the handle is poisoned and the caller must start a fresh one.
    async fn resync(&mut self) {
        let budget = Duration::from_millis(RESYNC_TIMEOUT_MS);
        let drained = tokio::time::timeout(budget, async {
            self.send("stop").await?;
            loop {
                if self.read_line().await?.starts_with("bestmove") {
                    return Ok::<(), EngineError>(());
                }
            }
        })
        .await;

        self.state = match drained {
            Ok(Ok(())) => EngineState::Ready,
            _ => EngineState::Crashed,
        };
    }

    /// Send `quit` and wait for the process to exit.
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl PositionEngine for UciEngine {
    async fn evaluate(&mut self, fen: &str, movetime_ms: u64) -> Result<Evaluation, EngineError> {
        if self.state == EngineState::Crashed {
            return Err(EngineError::Crashed(
                "engine process previously crashed".to_string(),
            ));
        }
        self.state = EngineState::Evaluating;

        let deadline = Duration::from_millis(movetime_ms + DEADLINE_GRACE_MS);
        match tokio::time::timeout(deadline, self.search(fen, movetime_ms)).await {
            Ok(Ok(eval)) => {
                self.state = EngineState::Ready;
                Ok(eval)
            }
            Ok(Err(EngineError::Timeout(ms))) => {
                self.state = EngineState::Ready;
                Err(EngineError::Timeout(ms))
            }
            Ok(Err(e)) => {
                self.state = EngineState::Crashed;
                Err(e)
            }
            Err(_) => {
                self.resync().await;
                Err(EngineError::Timeout(movetime_ms))
            }
        }
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill so no exit path leaks a process.
        let _ = self.process.start_kill();
    }
}

/// The token following `key`, if any.
fn token_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut parts = line.split_whitespace();
    while let Some(part) = parts.next() {
        if part == key {
            return parts.next();
        }
    }
    None
}

fn parse_cp(line: &str) -> Option<i32> {
    token_after(line, "cp")?.parse().ok()
}

fn parse_mate(line: &str) -> Option<i32> {
    token_after(line, "mate")?.parse().ok()
}

fn parse_depth(line: &str) -> Option<i32> {
    token_after(line, "depth")?.parse().ok()
}

/// PV moves: everything after the `pv` token up to the next non-move field.
fn parse_pv(line: &str) -> Vec<String> {
    line.split_whitespace()
        .skip_while(|part| *part != "pv")
        .skip(1)
        .take_while(|part| !matches!(*part, "string" | "bmc"))
        .map(str::to_string)
        .collect()
}
