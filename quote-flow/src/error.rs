use thiserror::Error;

/// Errors surfaced by the flow engine and its storage collaborators.
///
/// Validation failures are deliberately not listed here: a rejected
/// submission is a normal outcome (see `SubmitOutcome::Rejected`) carrying
/// field-keyed messages, not an error to bubble up.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Draft not found: {0}/{1}")]
    DraftNotFound(String, String),

    #[error("Quote not found: {0}")]
    QuoteNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Invalid flow definition: {0}")]
    InvalidFlow(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// True for the variants that mean "the named thing does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FlowError::SessionNotFound(_)
                | FlowError::FlowNotFound(_)
                | FlowError::DraftNotFound(..)
                | FlowError::QuoteNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
