//! Enumeration types shared across the Quizcast workspace.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Answer options
// ---------------------------------------------------------------------------

/// One of the four options of a quiz.
///
/// Stored as a single upper-case letter in `PostgreSQL` (`VARCHAR(1)`) and
/// serialized the same way on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum AnswerOption {
    /// Option `A`.
    A,
    /// Option `B`.
    B,
    /// Option `C`.
    C,
    /// Option `D`.
    D,
}

impl AnswerOption {
    /// All options in display order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// The single-letter database and wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for AnswerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of `A`, `B`, `C`, `D`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid answer option {0:?}: expected one of A, B, C, D")]
pub struct InvalidAnswerOption(pub String);

impl FromStr for AnswerOption {
    type Err = InvalidAnswerOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(InvalidAnswerOption(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Session status transitions
// ---------------------------------------------------------------------------

/// The moderator action that produced a `session_update` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SessionStatus {
    /// A new session was created with its first quiz.
    Started,
    /// The session moved to another quiz.
    QuestionChanged,
    /// Answer acceptance was switched on or off.
    AnswerAcceptanceToggled,
    /// The session was closed.
    Ended,
}

// ---------------------------------------------------------------------------
// Authentication failures
// ---------------------------------------------------------------------------

/// Credential failures reported by the upstream authentication layer.
///
/// Quizcast does not issue or validate credentials; these are surfaced at
/// the HTTP boundary with a stable code so clients can react uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthFailure {
    /// The presented token has expired.
    TokenExpired,
    /// The presented token is malformed or carries a bad signature.
    TokenInvalid,
    /// The presented token was revoked (for example by logout).
    TokenRevoked,
}

impl AuthFailure {
    /// Stable error code for API responses.
    pub const fn code(self) -> &'static str {
        match self {
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenRevoked => "TOKEN_REVOKED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_option_parses_letters() {
        assert_eq!("A".parse::<AnswerOption>(), Ok(AnswerOption::A));
        assert_eq!(" D ".parse::<AnswerOption>(), Ok(AnswerOption::D));
        assert!("E".parse::<AnswerOption>().is_err());
        assert!("a".parse::<AnswerOption>().is_err());
    }

    #[test]
    fn answer_option_wire_format_is_single_letter() {
        let json = serde_json::to_string(&AnswerOption::C).ok();
        assert_eq!(json.as_deref(), Some("\"C\""));
        assert!(serde_json::from_str::<AnswerOption>("\"X\"").is_err());
    }

    #[test]
    fn session_status_is_snake_case() {
        let json = serde_json::to_string(&SessionStatus::AnswerAcceptanceToggled).ok();
        assert_eq!(json.as_deref(), Some("\"answer_acceptance_toggled\""));
    }
}
