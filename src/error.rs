use thiserror::Error;

/// Rejections from the recorder registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Recorder not found: {0}")]
    RecorderNotFound(String),

    #[error("Recorder already exists: {0}")]
    DuplicateId(String),

    #[error("Recorder name '{name}' collides with '{existing}' on the show-control link")]
    NameCollision { name: String, existing: String },

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Failure of an operation requested by the UI or the monitoring hub.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OpError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{0}")]
    Deck(String),
}

impl OpError {
    pub fn deck(message: impl Into<String>) -> Self {
        Self::Deck(message.into())
    }
}
