//! The agent loop for agentloop.
//!
//! One loop execution turns a task into a final answer:
//!
//! 1. **Send** the system prompt, tool schemas and full history to the model
//! 2. **If the completion tool is called**: exit with its answer
//! 3. **If tools are requested**: run them all concurrently, append one
//!    result per invocation, go back to step 1
//! 4. **Otherwise**: exit with the model's text
//!
//! Iteration and wall-clock bounds are checked before every model call. The
//! [`ExitHandler`] turns the exit record into a [`Delivery`] for the
//! profile's destination.

pub mod controller;
pub mod executor;
pub mod exit;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use controller::{AgentLoop, ExitReason, ExitRecord, LoopOutcome};
pub use executor::ToolCallExecutor;
pub use exit::{Delivery, ExitHandler};
pub use state::{LoopLimits, LoopState, TurnInput};
