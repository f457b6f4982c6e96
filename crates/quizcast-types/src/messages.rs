//! WebSocket message types.
//!
//! Every frame in either direction is a JSON envelope of the form
//! `{"type": "...", "data": {...}}`. Server frames are modelled by
//! [`ServerMessage`] (adjacently tagged so serde produces the envelope
//! directly); client frames are parsed leniently by
//! [`ClientMessage::parse`] because older participant apps put `quiz_id`
//! next to `type` instead of inside `data`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{AnswerOption, SessionStatus};
use crate::ids::{QuizId, SessionId};
use crate::structs::{QuizPublic, QuizResults};

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// A message pushed from the server to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Fresh tally for a quiz.
    ResultUpdate(QuizResults),
    /// Session-wide status change.
    SessionUpdate(SessionUpdate),
    /// A new quiz became live.
    QuestionSwitch(QuestionSwitch),
    /// Answers were closed for a quiz.
    VotingEnd(VotingEnd),
    /// Live answer counts while voting is open.
    AnswerStatus(AnswerStatus),
    /// Reply to a client heartbeat.
    HeartbeatAck(HeartbeatAck),
}

impl ServerMessage {
    /// The `type` tag of this message.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::ResultUpdate(_) => MessageKind::ResultUpdate,
            Self::SessionUpdate(_) => MessageKind::SessionUpdate,
            Self::QuestionSwitch(_) => MessageKind::QuestionSwitch,
            Self::VotingEnd(_) => MessageKind::VotingEnd,
            Self::AnswerStatus(_) => MessageKind::AnswerStatus,
            Self::HeartbeatAck(_) => MessageKind::HeartbeatAck,
        }
    }

    /// Serialize into the `{type, data}` JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if a payload cannot be encoded.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The `type` tag of a server message, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `result_update`
    ResultUpdate,
    /// `session_update`
    SessionUpdate,
    /// `question_switch`
    QuestionSwitch,
    /// `voting_end`
    VotingEnd,
    /// `answer_status`
    AnswerStatus,
    /// `heartbeat_ack`
    HeartbeatAck,
}

impl MessageKind {
    /// The wire name of the message type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResultUpdate => "result_update",
            Self::SessionUpdate => "session_update",
            Self::QuestionSwitch => "question_switch",
            Self::VotingEnd => "voting_end",
            Self::AnswerStatus => "answer_status",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

impl core::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `session_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionUpdate {
    /// The session that changed, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub session_id: Option<SessionId>,
    /// The live quiz after the change; `None` once the session ended.
    pub current_quiz: Option<QuizPublic>,
    /// Whether answers are accepted after the change.
    pub is_accepting_answers: bool,
    /// What the moderator did.
    pub status: SessionStatus,
    /// When the change happened.
    pub updated_at: DateTime<Utc>,
}

/// Payload of `question_switch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuestionSwitch {
    /// The quiz that is now live.
    pub quiz_id: QuizId,
    /// 1-based position of the quiz among all quizzes.
    pub question_number: u32,
    /// Number of quizzes in the set.
    pub total_questions: u32,
    /// When the switch happened.
    pub switched_at: DateTime<Utc>,
}

/// Payload of `voting_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VotingEnd {
    /// The quiz whose voting closed.
    pub quiz_id: QuizId,
    /// The question within the quiz (one question per quiz, so equal to
    /// `quiz_id`).
    pub question_id: QuizId,
    /// When voting closed.
    pub ended_at: DateTime<Utc>,
}

/// Payload of `answer_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AnswerStatus {
    /// The quiz being answered.
    pub quiz_id: QuizId,
    /// The question within the quiz (equal to `quiz_id`).
    pub question_id: QuizId,
    /// Number of registered participants.
    pub total_participants: u32,
    /// Number of participants who answered this quiz.
    pub answered_count: u32,
    /// Answers per option; always contains all four options.
    pub answer_counts: BTreeMap<AnswerOption, u32>,
    /// When the counts were taken.
    pub updated_at: DateTime<Utc>,
}

/// Payload of `heartbeat_ack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HeartbeatAck {
    /// Server time when the heartbeat was processed.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// A message sent by an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Observe the given quiz (replaces any previous subscription).
    Subscribe {
        /// The quiz to observe.
        quiz_id: QuizId,
    },
    /// Stop observing any quiz.
    Unsubscribe,
    /// Keep-alive; answered with `heartbeat_ack`.
    Heartbeat,
}

/// Errors produced while parsing a client frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object with a string `type`.
    #[error("malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A `subscribe` frame without a usable `quiz_id`.
    #[error("subscribe message is missing quiz_id")]
    MissingQuizId,

    /// A `type` the server does not understand.
    #[error("unknown client message type {0:?}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    quiz_id: Option<QuizId>,
}

impl ClientMessage {
    /// Parse a text frame received from an observer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the frame is not valid JSON, has an
    /// unknown `type`, or is a `subscribe` without a quiz id.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            "subscribe" => {
                let nested = raw
                    .data
                    .as_ref()
                    .and_then(|data| data.get("quiz_id"))
                    .and_then(serde_json::Value::as_i64)
                    .map(QuizId);
                nested
                    .or(raw.quiz_id)
                    .map(|quiz_id| Self::Subscribe { quiz_id })
                    .ok_or(ProtocolError::MissingQuizId)
            }
            "unsubscribe" => Ok(Self::Unsubscribe),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(ProtocolError::UnknownType(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_uses_type_data_envelope() {
        let msg = ServerMessage::HeartbeatAck(HeartbeatAck {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        });
        let value: serde_json::Value = msg
            .to_json()
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        assert_eq!(value["type"], "heartbeat_ack");
        assert!(value["data"]["timestamp"].is_string());
        assert_eq!(msg.kind().as_str(), "heartbeat_ack");
    }

    #[test]
    fn answer_status_counts_are_keyed_by_letter() {
        let mut counts = BTreeMap::new();
        for option in AnswerOption::ALL {
            counts.insert(option, 0);
        }
        counts.insert(AnswerOption::B, 3);
        let msg = ServerMessage::AnswerStatus(AnswerStatus {
            quiz_id: QuizId(4),
            question_id: QuizId(4),
            total_participants: 10,
            answered_count: 3,
            answer_counts: counts,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        });
        let value: serde_json::Value = msg
            .to_json()
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        assert_eq!(value["type"], "answer_status");
        assert_eq!(value["data"]["answer_counts"]["B"], 3);
        assert_eq!(value["data"]["answer_counts"]["D"], 0);
        assert_eq!(value["data"]["quiz_id"], 4);
    }

    #[test]
    fn parses_subscribe_with_nested_data() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","data":{"quiz_id":9}}"#).ok();
        assert_eq!(msg, Some(ClientMessage::Subscribe { quiz_id: QuizId(9) }));
    }

    #[test]
    fn parses_subscribe_with_flat_quiz_id() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","quiz_id":3}"#).ok();
        assert_eq!(msg, Some(ClientMessage::Subscribe { quiz_id: QuizId(3) }));
    }

    #[test]
    fn parses_unsubscribe_and_heartbeat_with_or_without_data() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"unsubscribe","data":{}}"#).ok(),
            Some(ClientMessage::Unsubscribe)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"heartbeat"}"#).ok(),
            Some(ClientMessage::Heartbeat)
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"subscribe","data":{}}"#),
            Err(ProtocolError::MissingQuizId)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"vote"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "vote"
        ));
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
