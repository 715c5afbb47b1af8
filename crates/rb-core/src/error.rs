#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("'{0}' cannot run during the collect phase")]
    CollectMode(String),

    #[error("Policy rule '{rule_id}' blocks command: {command}")]
    PolicyBlocked { rule_id: String, command: String },

    #[error("Prompt cancelled")]
    PromptCancelled,

    #[error("Prompt '{0}' requires input but the driver is non-interactive")]
    NonInteractive(String),

    #[error("{0}")]
    Validation(String),

    #[error("Command exited with code {exit_code}: {command}")]
    CommandExecution { command: String, exit_code: i32 },

    #[error("Failed to parse captured output for '{store_as}': {message}")]
    Parse { store_as: String, message: String },

    #[error("No error-policy mapping for value '{value}' at key '{key}'")]
    PolicyMissing { key: String, value: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Template error at position {position}: {message}")]
    Template { position: usize, message: String },
}

impl EngineError {
    /// Stable machine-readable kind, used in telemetry and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::CollectMode(_) => "collect-mode",
            Self::PolicyBlocked { .. } => "policy-blocked",
            Self::PromptCancelled => "prompt-cancelled",
            Self::NonInteractive(_) => "non-interactive",
            Self::Validation(_) => "validation",
            Self::CommandExecution { .. } => "command-execution",
            Self::Parse { .. } => "parse",
            Self::PolicyMissing { .. } => "policy-missing",
            Self::Checkpoint(_) => "checkpoint",
            Self::Template { .. } => "template",
        }
    }
}
