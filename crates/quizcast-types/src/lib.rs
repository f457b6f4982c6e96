//! Shared type definitions for the Quizcast live-polling engine.
//!
//! This crate is the single source of truth for the types used across the
//! Quizcast workspace. The WebSocket message types flow downstream to
//! `TypeScript` via `ts-rs` for the admin dashboard and participant app.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for row keys and connection ids
//! - [`enums`] -- Answer options, session status, auth failures
//! - [`structs`] -- Stored records (quiz, session, answer) and derived views
//! - [`messages`] -- WebSocket envelopes in both directions

pub mod enums;
pub mod ids;
pub mod messages;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{AnswerOption, AuthFailure, InvalidAnswerOption, SessionStatus};
pub use ids::{AnswerId, ConnectionId, ParticipantId, QuizId, SessionId};
pub use messages::{
    AnswerStatus, ClientMessage, HeartbeatAck, MessageKind, ProtocolError, QuestionSwitch,
    ServerMessage, SessionUpdate, VotingEnd,
};
pub use structs::{
    Answer, CorrectParticipant, OptionResult, OverallRanking, Participant, ParticipantAnswer,
    ParticipantAnswers, ParticipantRanking, ParticipantSummary, Quiz, QuizPublic, QuizRanking,
    QuizResults, RankingEntry, Session, SessionView,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the bindings into `bindings/` relative to the crate
        // root when `export_all` runs.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::QuizId::export_all();
        let _ = crate::ids::ParticipantId::export_all();
        let _ = crate::ids::AnswerId::export_all();
        let _ = crate::ids::SessionId::export_all();

        // Enums
        let _ = crate::enums::AnswerOption::export_all();
        let _ = crate::enums::SessionStatus::export_all();

        // Structs
        let _ = crate::structs::Quiz::export_all();
        let _ = crate::structs::QuizPublic::export_all();
        let _ = crate::structs::Participant::export_all();
        let _ = crate::structs::Session::export_all();
        let _ = crate::structs::Answer::export_all();
        let _ = crate::structs::OptionResult::export_all();
        let _ = crate::structs::QuizResults::export_all();
        let _ = crate::structs::RankingEntry::export_all();
        let _ = crate::structs::OverallRanking::export_all();
        let _ = crate::structs::SessionView::export_all();
        let _ = crate::structs::CorrectParticipant::export_all();
        let _ = crate::structs::QuizRanking::export_all();
        let _ = crate::structs::ParticipantRanking::export_all();
        let _ = crate::structs::ParticipantSummary::export_all();
        let _ = crate::structs::ParticipantAnswer::export_all();
        let _ = crate::structs::ParticipantAnswers::export_all();

        // Messages
        let _ = crate::messages::ServerMessage::export_all();
        let _ = crate::messages::SessionUpdate::export_all();
        let _ = crate::messages::QuestionSwitch::export_all();
        let _ = crate::messages::VotingEnd::export_all();
        let _ = crate::messages::AnswerStatus::export_all();
        let _ = crate::messages::HeartbeatAck::export_all();
    }
}
