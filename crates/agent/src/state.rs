//! Per-execution loop state and the input handed to each turn.

use agentloop_core::provider::Usage;
use agentloop_core::tool::ToolResult;
use std::time::Duration;
use tokio::time::Instant;

/// Safety bounds for one loop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// Maximum model calls
    pub max_iterations: u32,
    /// Wall-clock budget, checked between turns
    pub timeout: Duration,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Counters owned by a single loop execution.
///
/// Moved into every turn and handed back updated; never shared.
#[derive(Debug)]
pub struct LoopState {
    iteration: u32,
    started_at: Instant,
    limits: LoopLimits,
    usage: Usage,
}

/// A bound that stops the loop before the next model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Iterations,
    Timeout,
}

impl LoopState {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            iteration: 0,
            started_at: Instant::now(),
            limits,
            usage: Usage::default(),
        }
    }

    /// Count the model call about to be made and check the bounds.
    ///
    /// Returns the bound that tripped, if any. No model call may be issued
    /// once this returns `Some`.
    pub fn begin_iteration(&mut self) -> Option<Bound> {
        self.iteration += 1;
        if self.iteration > self.limits.max_iterations {
            return Some(Bound::Iterations);
        }
        if self.elapsed() > self.limits.timeout {
            return Some(Bound::Timeout);
        }
        None
    }

    /// The current iteration (1-based once the first call has begun).
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage += usage;
    }
}

/// What a turn starts from.
#[derive(Debug)]
pub enum TurnInput {
    /// The first turn of an execution, built from the trigger's task
    First { task: String },
    /// Every later turn: the state so far plus the previous turn's results
    Continuation {
        state: LoopState,
        tool_results: Vec<ToolResult>,
    },
}
