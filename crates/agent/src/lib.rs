//! The vision-action loop: the heart of BimPilot.
//!
//! Each task follows a bounded **Infer → Act → Observe** cycle:
//!
//! 1. **Start** the conversation with the operator's task
//! 2. **Infer**: send the whole conversation and the tool catalog to the engine
//! 3. **Act**: if it requested tools, dispatch them through the backend
//! 4. **Observe**: format each result (screenshots included) and append it
//! 5. **Finish** when the engine answers in plain text or the budget runs out
//!
//! Captured screenshots are also written to a small per-task frame store for
//! debugging.

pub mod dispatcher;
pub mod formatter;
pub mod frames;
pub mod loop_runner;
pub mod prompt;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{Dispatched, ToolDispatcher};
pub use formatter::{FormattedResult, ResultFormatter, format_blocks};
pub use frames::{FrameError, FrameHistoryBuffer, FrameRecord};
pub use loop_runner::{AgentLoop, TaskAborted, TaskReport};
pub use state::{LoopState, TaskOutcome};
