use thiserror::Error;

use crate::gateway::GatewayError;

/// Everything a session transition can report back to the student.
///
/// All variants are rendered as inline status text; none of them end the
/// process. `NoActiveTest` and `AlreadySubmitted` leave the session back in
/// `Idle` with nothing useful left to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("No test is currently available. Please check the schedule.")]
    NoActiveTest,
    #[error("You have already submitted this test!")]
    AlreadySubmitted,
    #[error("Fullscreen mode is required to take the test: {0}")]
    FullscreenRequired(String),
    #[error("Error connecting to server: {0}")]
    Network(String),
    #[error("Error: {0}")]
    BackendRejection(String),
}

impl SessionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Errors after which the student can immediately try the same action again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::FullscreenRequired(_)
                | Self::Network(_)
                | Self::BackendRejection(_)
        )
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(msg) => Self::BackendRejection(msg),
            other => Self::Network(other.to_string()),
        }
    }
}
