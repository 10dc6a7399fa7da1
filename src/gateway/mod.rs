//! The remote question/schedule/submission service.

pub mod http;
pub mod memory;
mod wire;

pub use http::HttpGateway;
pub use memory::MemoryGateway;
pub use wire::{QuestionsPayload, Settings, Submission, SubmissionRecord};

use thiserror::Error;

use crate::schedule::Schedule;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected response: {0}")]
    Decode(String),
    /// The backend answered but refused (`{success: false}` or `{error}`).
    #[error("{0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Operations the student client needs.
pub trait Gateway: Send + Sync {
    fn schedule(&self) -> Result<Schedule, GatewayError>;
    fn questions(&self, day: u8) -> Result<QuestionsPayload, GatewayError>;
    fn submission_exists(&self, email: &str, day: u8) -> Result<bool, GatewayError>;
    fn submit(&self, submission: &Submission) -> Result<(), GatewayError>;
}

/// Pass-through maintenance operations used by the admin commands.
pub trait AdminGateway: Gateway {
    fn settings(&self) -> Result<Settings, GatewayError>;
    fn save_settings(&self, settings: &Settings) -> Result<(), GatewayError>;
    fn save_questions(&self, day: u8, questions: &QuestionsPayload) -> Result<(), GatewayError>;
    fn save_schedule(&self, schedule: &Schedule) -> Result<(), GatewayError>;
    fn submissions(&self) -> Result<Vec<SubmissionRecord>, GatewayError>;
}
