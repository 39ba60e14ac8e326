//! Error types for the scoring backends and the evaluation session.

use thiserror::Error;

use crate::models::{RacId, StudentId};

/// Errors reported by a [`ScoringApi`](crate::api::ScoringApi) backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Database error from the Postgres backend.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backend refused the request with a human-readable reason.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The backend answered with a payload that does not match its schema.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ApiError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::rejected(404, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::rejected(400, message)
    }
}

/// Errors surfaced by the evaluation session to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no student selected")]
    NoStudentSelected,

    #[error("student {0} is not in the roster")]
    UnknownStudent(StudentId),

    #[error("RAC {0} is not part of the current sample")]
    UnknownItem(RacId),

    #[error("the item sample is empty")]
    EmptySample,

    #[error("{missing} evaluations are still missing")]
    MissingScores { missing: usize },

    #[error("a score is required for RAC {0}")]
    MissingScore(RacId),

    #[error("a submission for student {0} is already in flight")]
    SubmitInFlight(StudentId),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Validation failures are caught before any request is issued.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SessionError::Api(_) | SessionError::SubmitInFlight(_))
    }
}
