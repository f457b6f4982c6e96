//! Core domain records.
//!
//! These mirror the rows the relational store holds (quizzes,
//! participants, sessions, answers) plus the derived, never-persisted
//! tally and ranking views computed from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::AnswerOption;
use crate::ids::{AnswerId, ParticipantId, QuizId, SessionId};

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A quiz: one question with four options and one correct option.
///
/// Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Quiz {
    /// Quiz identifier.
    pub id: QuizId,
    /// The question shown to participants.
    pub question_text: String,
    /// Text of option A.
    pub option_a: String,
    /// Text of option B.
    pub option_b: String,
    /// Text of option C.
    pub option_c: String,
    /// Text of option D.
    pub option_d: String,
    /// The correct option.
    pub correct_answer: AnswerOption,
    /// Optional image shown with the question.
    pub image_url: Option<String>,
    /// Optional video shown with the question.
    pub video_url: Option<String>,
}

impl Quiz {
    /// Project the quiz into its public form (no correct answer).
    pub fn to_public(&self) -> QuizPublic {
        QuizPublic {
            id: self.id,
            question_text: self.question_text.clone(),
            option_a: self.option_a.clone(),
            option_b: self.option_b.clone(),
            option_c: self.option_c.clone(),
            option_d: self.option_d.clone(),
            image_url: self.image_url.clone(),
            video_url: self.video_url.clone(),
        }
    }
}

/// A quiz as shown to participants and observers while it is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuizPublic {
    /// Quiz identifier.
    pub id: QuizId,
    /// The question text.
    pub question_text: String,
    /// Text of option A.
    pub option_a: String,
    /// Text of option B.
    pub option_b: String,
    /// Text of option C.
    pub option_c: String,
    /// Text of option D.
    pub option_d: String,
    /// Optional image shown with the question.
    pub image_url: Option<String>,
    /// Optional video shown with the question.
    pub video_url: Option<String>,
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Participant {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Display name chosen at registration.
    pub nickname: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// The authoritative quiz session: which quiz is live and whether voting
/// is open.
///
/// Only the most recently created session row is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// The quiz currently live, if any.
    pub current_quiz_id: Option<QuizId>,
    /// Whether answers are currently accepted.
    pub is_accepting_answers: bool,
    /// Creation time of the session row.
    pub created_at: DateTime<Utc>,
    /// Time of the last moderator change.
    pub updated_at: DateTime<Utc>,
}

/// A participant's recorded choice for one quiz.
///
/// Unique per `(participant_id, quiz_id)`. `is_correct` is recomputed on
/// every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Answer {
    /// Answer row identifier.
    pub id: AnswerId,
    /// Who answered.
    pub participant_id: ParticipantId,
    /// Which quiz was answered.
    pub quiz_id: QuizId,
    /// The chosen option.
    pub selected_option: AnswerOption,
    /// Whether the chosen option matched the quiz's correct option at
    /// write time.
    pub is_correct: bool,
    /// Time of the most recent write.
    pub answered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

/// Count and share of one option in a tally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OptionResult {
    /// Number of answers choosing this option.
    pub count: u32,
    /// `count / total * 100`, or `0` when there are no answers.
    pub percentage: f64,
}

/// The tally of a quiz, recomputed from the answer rows on demand.
///
/// Sent to observers as the `result_update` message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuizResults {
    /// The quiz this tally belongs to.
    pub quiz_id: QuizId,
    /// The question text.
    pub question_text: String,
    /// Total number of answers.
    pub total_answers: u32,
    /// Per-option results; always contains all four options.
    pub results: BTreeMap<AnswerOption, OptionResult>,
    /// The correct option.
    pub correct_answer: AnswerOption,
    /// Number of answers choosing the correct option.
    pub correct_count: u32,
    /// Share of correct answers.
    pub correct_percentage: f64,
    /// Whether voting is open, when the caller knows the session state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub is_accepting_answers: Option<bool>,
    /// When the tally was computed.
    pub updated_at: DateTime<Utc>,
}

impl QuizResults {
    /// Count for one option (zero when absent).
    pub fn count_for(&self, option: AnswerOption) -> u32 {
        self.results.get(&option).map_or(0, |r| r.count)
    }
}

/// One row of the overall participant ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RankingEntry {
    /// 1-based rank.
    pub rank: u32,
    /// Ranked participant.
    pub participant_id: ParticipantId,
    /// Participant nickname.
    pub nickname: String,
    /// Number of quizzes the participant answered.
    pub total_answers: u32,
    /// Number of correct answers.
    pub correct_answers: u32,
    /// `correct_answers / total_answers`, or `0` without answers.
    pub accuracy_rate: f64,
    /// Score (one point per correct answer).
    pub total_score: u32,
}

/// A page of the overall ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OverallRanking {
    /// Ranked participants, best first.
    pub ranking: Vec<RankingEntry>,
    /// Number of registered participants.
    pub total_participants: u32,
    /// When the ranking was computed.
    pub updated_at: DateTime<Utc>,
}

/// A participant who picked the correct option of one quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CorrectParticipant {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Participant nickname.
    pub nickname: String,
    /// The (correct) option chosen.
    pub selected_option: AnswerOption,
    /// Time of the most recent write.
    pub answered_at: DateTime<Utc>,
}

/// Who got one quiz right, earliest answer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuizRanking {
    /// Quiz identifier.
    pub quiz_id: QuizId,
    /// The question text.
    pub question_text: String,
    /// Correct answers, earliest first.
    pub correct_participants: Vec<CorrectParticipant>,
    /// Number of correct answers.
    pub total_correct: u32,
    /// Number of answers.
    pub total_answers: u32,
    /// `total_correct / total_answers * 100`, or `0` without answers.
    pub correct_percentage: f64,
}

/// Where one participant stands in the overall ranking.
///
/// `current_rank` is one more than the number of participants strictly
/// ahead under the overall ranking order (score, then accuracy, then
/// answers), so tied participants share a rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantRanking {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Participant nickname.
    pub nickname: String,
    /// 1-based rank.
    pub current_rank: u32,
    /// Number of registered participants.
    pub total_participants: u32,
    /// Number of quizzes answered.
    pub total_answers: u32,
    /// Number of correct answers.
    pub correct_answers: u32,
    /// `correct_answers / total_answers`, or `0` without answers.
    pub accuracy_rate: f64,
    /// Score (one point per correct answer).
    pub total_score: u32,
    /// Share of participants at or below this rank, in percent.
    pub percentile: f64,
}

/// A participant with their answer totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantSummary {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Display name chosen at registration.
    pub nickname: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Number of quizzes answered.
    pub total_answers: u32,
    /// Number of correct answers.
    pub correct_answers: u32,
}

/// One entry of a participant's answer history, joined with its quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantAnswer {
    /// Answer row identifier.
    pub answer_id: AnswerId,
    /// Which quiz was answered.
    pub quiz_id: QuizId,
    /// The question text.
    pub question_text: String,
    /// The chosen option.
    pub selected_option: AnswerOption,
    /// The quiz's correct option.
    pub correct_answer: AnswerOption,
    /// Whether the choice was correct at write time.
    pub is_correct: bool,
    /// Time of the most recent write.
    pub answered_at: DateTime<Utc>,
}

/// A participant's answer history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantAnswers {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Answers, newest first.
    pub answers: Vec<ParticipantAnswer>,
    /// Number of answers.
    pub total_answers: u32,
    /// Number of correct answers.
    pub correct_answers: u32,
    /// `correct_answers / total_answers`, or `0` without answers.
    pub accuracy_rate: f64,
}

/// Public view of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionView {
    /// Session identifier, or `None` when no session was ever started.
    pub session_id: Option<SessionId>,
    /// The live quiz without its correct answer.
    pub current_quiz: Option<QuizPublic>,
    /// Whether answers are currently accepted.
    pub is_accepting_answers: bool,
    /// Number of registered participants.
    pub total_participants: u32,
    /// Number of answers for the live quiz.
    pub answers_count: u32,
}
