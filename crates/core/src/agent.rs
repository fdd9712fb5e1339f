//! Agent execution settings shared between configuration and the loop.

use serde::{Deserialize, Serialize};

/// How the tool calls of a single step are executed.
///
/// The navigation backend is usually one stateful viewer session, and two
/// camera mutations in flight at once would race. Only switch to
/// `Concurrent` for a backend whose state model tolerates it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionMode {
    /// Each call is awaited before the next one starts (default)
    #[default]
    Sequential,
    /// All calls of a step run at once
    Concurrent,
}

impl std::fmt::Display for ToolExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolExecutionMode::Sequential => write!(f, "sequential"),
            ToolExecutionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}
