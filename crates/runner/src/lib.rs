//! The agent runner: the loop that drives agents turn by turn.
//!
//! Each run follows a **Call → Dispatch → Fold** cycle:
//!
//! 1. **Diff** the history against what the model backend already holds
//! 2. **Call** the current agent's model with that input
//! 3. **If tool calls**: gate them for approval, run the approved ones
//!    concurrently, fold results back in call order, loop to step 1
//! 4. **If a hand-off**: switch the current agent and loop to step 1
//! 5. **If text**: check it against the agent's output type and the output
//!    guardrails, then complete
//!
//! A run that needs approval pauses with an [`ExecutionState`] that can be
//! serialized, decided on, and resumed later, possibly in another process.

pub mod error;
mod guardrails;
pub mod history;
pub mod scheduler;
pub mod state;
pub mod stream;
pub mod test_support;
mod tooling;

pub use error::{Result, RunError};
pub use history::{SendProgress, TurnInput, compute_turn_input};
pub use scheduler::{NOT_APPROVED_MESSAGE, RunInput, RunOptions, RunResult, Runner};
pub use state::{ExecutionState, RunStatus, SCHEMA_VERSION, agent_fingerprint};
pub use stream::{RunItemEventName, RunStreamEvent, StreamedRun};
