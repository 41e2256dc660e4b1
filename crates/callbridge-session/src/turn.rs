//! Turn bookkeeping for the AI response stream.

/// Where the current AI turn stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    /// No turn in progress.
    #[default]
    Idle,
    /// The model is producing output.
    AwaitingModel,
    /// A tool-call batch was answered; the model has not yet closed the turn
    /// that asked for it.
    AwaitingToolResult,
}

impl TurnPhase {
    pub fn on_tool_calls(self) -> Self {
        Self::AwaitingToolResult
    }

    /// Audio or text from the model.
    pub fn on_model_output(self) -> Self {
        Self::AwaitingModel
    }

    /// Returns the next phase and whether an end-of-turn marker is due.
    ///
    /// The completion that closes a tool-call turn is swallowed; every
    /// completion after it is a normal turn boundary.
    pub fn on_turn_complete(self) -> (Self, bool) {
        match self {
            Self::AwaitingToolResult => (Self::Idle, false),
            Self::Idle | Self::AwaitingModel => (Self::Idle, true),
        }
    }
}
