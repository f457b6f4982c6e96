//! The store facade used by the engine.
//!
//! [`Store`] dispatches to either the `PostgreSQL` backend or the
//! in-memory backend and bounds every call with the configured query
//! timeout, so a slow database surfaces as [`DbError::Timeout`] instead
//! of a request that hangs.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use quizcast_types::{
    Answer, AnswerId, AnswerOption, CorrectParticipant, Participant, ParticipantAnswer,
    ParticipantId, Quiz, QuizId, RankingEntry, Session,
};

use crate::error::DbError;
use crate::memory::MemoryStore;
use crate::pg_store::PgStore;
use crate::postgres::PostgresPool;

/// Default bound on a single store call.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of an answer upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The stored answer after the write.
    pub answer: Answer,
    /// `true` if a new row was inserted, `false` if an existing row was
    /// overwritten.
    pub created: bool,
}

/// Position of a quiz within the full quiz set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizPosition {
    /// 1-based ordinal of the quiz (by id).
    pub question_number: u32,
    /// Number of quizzes.
    pub total_questions: u32,
}

#[derive(Clone)]
enum Backend {
    Postgres(PgStore),
    Memory(MemoryStore),
}

/// Handle to the canonical quiz store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
    query_timeout: Duration,
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let backend = match self.backend {
            Backend::Postgres(_) => "postgres",
            Backend::Memory(_) => "memory",
        };
        f.debug_struct("Store")
            .field("backend", &backend)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Dispatch a call to whichever backend is active.
macro_rules! dispatch {
    ($self:ident, $op:literal, $method:ident ( $($arg:expr),* )) => {
        match &$self.backend {
            Backend::Postgres(store) => $self.bounded($op, store.$method($($arg),*)).await,
            Backend::Memory(store) => $self.bounded($op, store.$method($($arg),*)).await,
        }
    };
}

impl Store {
    /// Store backed by `PostgreSQL`.
    pub fn postgres(pool: PostgresPool) -> Self {
        Self {
            backend: Backend::Postgres(PgStore::new(pool)),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Store backed by memory.
    pub fn memory(store: MemoryStore) -> Self {
        Self {
            backend: Backend::Memory(store),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// The per-call timeout.
    pub const fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Name of the active backend, for logs.
    pub const fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Postgres(_) => "postgres",
            Backend::Memory(_) => "memory",
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Store call timed out"
                );
                Err(DbError::Timeout {
                    operation,
                    after: self.query_timeout,
                })
            }
        }
    }

    /// Check that the backing store answers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the database is unreachable or slow.
    pub async fn ping(&self) -> Result<(), DbError> {
        match &self.backend {
            Backend::Postgres(store) => self.bounded("ping", store.pool().ping()).await,
            Backend::Memory(_) => Ok(()),
        }
    }

    /// The authoritative session (the most recently created one).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn get_session(&self) -> Result<Option<Session>, DbError> {
        dispatch!(self, "get_session", get_session())
    }

    /// Start a new session live on `quiz_id`, accepting answers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingReference`] if the quiz does not exist.
    pub async fn create_session(&self, quiz_id: QuizId) -> Result<Session, DbError> {
        dispatch!(self, "create_session", create_session(quiz_id))
    }

    /// Move the authoritative session to `quiz_id` and reopen voting.
    /// Returns `None` when no session exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn switch_session_quiz(&self, quiz_id: QuizId) -> Result<Option<Session>, DbError> {
        dispatch!(self, "switch_session_quiz", switch_session_quiz(quiz_id))
    }

    /// Open or close voting. Returns `None` when no session exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn set_accepting_answers(&self, accepting: bool) -> Result<Option<Session>, DbError> {
        dispatch!(self, "set_accepting_answers", set_accepting_answers(accepting))
    }

    /// Close the authoritative session. Returns `None` when no session
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn end_session(&self) -> Result<Option<Session>, DbError> {
        dispatch!(self, "end_session", end_session())
    }

    /// Load a quiz.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn get_quiz(&self, quiz_id: QuizId) -> Result<Option<Quiz>, DbError> {
        dispatch!(self, "get_quiz", get_quiz(quiz_id))
    }

    /// Load the correct option of a quiz.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn get_quiz_correct_answer(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<AnswerOption>, DbError> {
        dispatch!(self, "get_quiz_correct_answer", get_quiz_correct_answer(quiz_id))
    }

    /// Position of a quiz in the quiz set, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn quiz_position(&self, quiz_id: QuizId) -> Result<Option<QuizPosition>, DbError> {
        dispatch!(self, "quiz_position", quiz_position(quiz_id))
    }

    /// Whether a participant exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn participant_exists(&self, id: ParticipantId) -> Result<bool, DbError> {
        dispatch!(self, "participant_exists", participant_exists(id))
    }

    /// Load a participant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, DbError> {
        dispatch!(self, "get_participant", get_participant(id))
    }

    /// Register a participant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn create_participant(&self, nickname: &str) -> Result<Participant, DbError> {
        dispatch!(self, "create_participant", create_participant(nickname))
    }

    /// Number of registered participants.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn count_participants(&self) -> Result<u32, DbError> {
        dispatch!(self, "count_participants", count_participants())
    }

    /// Atomically insert or overwrite the participant's answer for a quiz.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingReference`] if the participant or quiz
    /// vanished, or another [`DbError`] on store failure or timeout.
    pub async fn upsert_answer(
        &self,
        participant_id: ParticipantId,
        quiz_id: QuizId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<UpsertOutcome, DbError> {
        dispatch!(
            self,
            "upsert_answer",
            upsert_answer(participant_id, quiz_id, selected, is_correct)
        )
    }

    /// Load an answer by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn get_answer(&self, id: AnswerId) -> Result<Option<Answer>, DbError> {
        dispatch!(self, "get_answer", get_answer(id))
    }

    /// Overwrite an existing answer's choice. Returns `None` if the answer
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn update_answer(
        &self,
        id: AnswerId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<Option<Answer>, DbError> {
        dispatch!(self, "update_answer", update_answer(id, selected, is_correct))
    }

    /// A participant's answers with their quiz details, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn participant_answers(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantAnswer>, DbError> {
        dispatch!(self, "participant_answers", participant_answers(participant_id))
    }

    /// Correct answers to a quiz with who gave them, earliest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn correct_participants(
        &self,
        quiz_id: QuizId,
    ) -> Result<Vec<CorrectParticipant>, DbError> {
        dispatch!(self, "correct_participants", correct_participants(quiz_id))
    }

    /// Answers per option for a quiz. Options nobody chose are absent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn count_answers_by_option(
        &self,
        quiz_id: QuizId,
    ) -> Result<BTreeMap<AnswerOption, u32>, DbError> {
        dispatch!(self, "count_answers_by_option", count_answers_by_option(quiz_id))
    }

    /// A page of the overall ranking.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn overall_ranking(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RankingEntry>, DbError> {
        dispatch!(self, "overall_ranking", overall_ranking(limit, offset))
    }

    /// Number of participants ranked strictly ahead of the given totals
    /// (more correct answers, then higher accuracy, then more answers).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn count_ranked_above(
        &self,
        correct: u32,
        accuracy: f64,
        total: u32,
    ) -> Result<u32, DbError> {
        dispatch!(
            self,
            "count_ranked_above",
            count_ranked_above(correct, accuracy, total)
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn slow_backend_surfaces_as_timeout() {
        let memory = MemoryStore::new();
        memory.set_latency(Some(Duration::from_millis(200))).await;
        let store = Store::memory(memory).with_query_timeout(Duration::from_millis(20));

        let result = store.get_session().await;
        assert!(matches!(
            result,
            Err(DbError::Timeout {
                operation: "get_session",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn memory_backend_round_trips_participants() {
        let store = Store::memory(MemoryStore::new());
        assert_eq!(store.backend_name(), "memory");
        let p = store.create_participant("dee").await.unwrap();
        assert!(store.participant_exists(p.id).await.unwrap());
        assert!(!store.participant_exists(ParticipantId(999)).await.unwrap());
        assert_eq!(store.count_participants().await.unwrap(), 1);
        store.ping().await.unwrap();
    }
}
