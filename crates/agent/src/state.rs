//! Step accounting and terminal outcomes for one task.

use serde::{Deserialize, Serialize};

/// Text reported when the step budget runs out.
pub const EXHAUSTED_TEXT: &str = "INCOMPLETE: Max steps reached";

/// Text reported when the operator cancels a task.
pub const CANCELLED_TEXT: &str = "CANCELLED: Task was cancelled";

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The engine answered without requesting tools.
    Completed(String),
    /// The step budget ran out first.
    Exhausted,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl TaskOutcome {
    /// Operator-facing text.
    pub fn text(&self) -> &str {
        match self {
            TaskOutcome::Completed(text) => text,
            TaskOutcome::Exhausted => EXHAUSTED_TEXT,
            TaskOutcome::Cancelled => CANCELLED_TEXT,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "completed",
            TaskOutcome::Exhausted => "exhausted",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// `Running` until `terminal` is set; the step counter only moves forward.
#[derive(Debug, Clone)]
pub struct LoopState {
    step: u32,
    max_steps: u32,
    terminal: Option<TaskOutcome>,
}

impl LoopState {
    pub fn new(max_steps: u32) -> Self {
        Self {
            step: 0,
            max_steps: max_steps.max(1),
            terminal: None,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Whether another inference may run.
    pub fn can_infer(&self) -> bool {
        self.terminal.is_none() && self.step < self.max_steps
    }

    /// Start the next step and return its 1-based number.
    pub fn begin_step(&mut self) -> u32 {
        debug_assert!(self.can_infer());
        self.step += 1;
        self.step
    }

    /// Enter a terminal state. The first terminal state wins.
    pub fn finish(&mut self, outcome: TaskOutcome) {
        if self.terminal.is_none() {
            self.terminal = Some(outcome);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn terminal(&self) -> Option<&TaskOutcome> {
        self.terminal.as_ref()
    }

    /// Consume the state, defaulting to `Exhausted` when no terminal state
    /// was reached.
    pub fn into_outcome(self) -> TaskOutcome {
        self.terminal.unwrap_or(TaskOutcome::Exhausted)
    }
}
