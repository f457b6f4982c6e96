//! Error types for the HTTP surface.
//!
//! [`ApiError`] unifies every failure a handler can report and converts
//! into the JSON envelope `{"success": false, "error": {"code", "message"}}`
//! via its [`IntoResponse`] implementation. Codes are stable strings that
//! the dashboards match on; the HTTP status is derived from the code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quizcast_core::{SessionError, SubmissionError};
use quizcast_db::DbError;
use quizcast_types::{AuthFailure, ParticipantId, QuizId};

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body or query failed validation.
    #[error("{0}")]
    Validation(String),

    /// A path id is not a positive integer.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Answer submission or correction was refused.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// A session transition was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The store failed or timed out.
    #[error(transparent)]
    Database(#[from] DbError),

    /// No session row exists.
    #[error("no active session")]
    NoActiveSession,

    /// A session exists but has no live quiz.
    #[error("no current quiz in session")]
    NoCurrentQuiz,

    /// The quiz does not exist.
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),

    /// The participant does not exist.
    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    /// Rejected by the upstream authentication layer.
    #[error("authentication failed")]
    Auth(AuthFailure),

    /// The client's token bucket is empty.
    #[error("rate limit exceeded, please try again later")]
    RateLimited,

    /// The connection registry is full.
    #[error("maximum connections reached")]
    ConnectionLimit {
        /// Configured connection cap.
        max: usize,
    },
}

impl ApiError {
    /// Stable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidId(_) => "INVALID_ID",
            Self::Submission(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::NoCurrentQuiz => "NO_CURRENT_QUIZ",
            Self::QuizNotFound(_) => "QUIZ_NOT_FOUND",
            Self::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            Self::Auth(failure) => failure.code(),
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::ConnectionLimit { .. } => "CONNECTION_LIMIT_EXCEEDED",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self.code() {
            "VALIDATION_ERROR" | "INVALID_ID" | "INVALID_QUIZ" => StatusCode::BAD_REQUEST,
            "TOKEN_EXPIRED" | "TOKEN_INVALID" | "TOKEN_REVOKED" => StatusCode::UNAUTHORIZED,
            "ANSWERS_NOT_ACCEPTED" => StatusCode::FORBIDDEN,
            "NO_ACTIVE_SESSION" | "NO_CURRENT_QUIZ" | "PARTICIPANT_NOT_FOUND"
            | "QUIZ_NOT_FOUND" | "ANSWER_NOT_FOUND" => StatusCode::NOT_FOUND,
            "RATE_LIMIT_EXCEEDED" => StatusCode::TOO_MANY_REQUESTS,
            "CONNECTION_LIMIT_EXCEEDED" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Store failures are not detailed.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_)
            | Self::Submission(SubmissionError::Database(_))
            | Self::Session(SessionError::Database(_)) => String::from("database error"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() && !matches!(self, Self::ConnectionLimit { .. }) {
            tracing::error!(code, error = %self, "Request failed");
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
        }

        let mut body = serde_json::json!({
            "success": false,
            "error": {
                "code": code,
                "message": self.public_message(),
            },
        });
        if let Self::ConnectionLimit { max } = self {
            body["max_connections"] = serde_json::json!(max);
        }

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_code() {
        assert_eq!(
            ApiError::Submission(SubmissionError::AnswersNotAccepted).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Submission(SubmissionError::InvalidQuiz {
                requested: QuizId(2),
                current: Some(QuizId(1)),
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Submission(SubmissionError::NoActiveSession).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Auth(AuthFailure::TokenRevoked).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::ConnectionLimit { max: 70 }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Database(DbError::Corrupt(String::from("row"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn database_details_are_not_exposed() {
        let err = ApiError::Database(DbError::Corrupt(String::from("selected_option 'Z'")));
        assert_eq!(err.public_message(), "database error");
    }
}
