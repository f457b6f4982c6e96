//! `PostgreSQL` implementation of the quiz store.
//!
//! Every read goes straight to the canonical tables; nothing is cached.
//! The answer upsert is a single `INSERT ... ON CONFLICT` statement keyed
//! on the `(participant_id, quiz_id)` unique constraint, so concurrent
//! duplicate submissions from the same participant can never observe "no
//! row yet" and both insert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quizcast_types::{
    Answer, AnswerId, AnswerOption, CorrectParticipant, Participant, ParticipantAnswer,
    ParticipantId, Quiz, QuizId, RankingEntry, Session, SessionId,
};

use crate::error::DbError;
use crate::postgres::PostgresPool;
use crate::store::{QuizPosition, UpsertOutcome};

/// Column list shared by every query returning a full answer row.
const ANSWER_COLUMNS: &str =
    "id, participant_id, quiz_id, selected_option, is_correct, answered_at";

/// Column list shared by every query returning a full session row.
const SESSION_COLUMNS: &str = "id, current_quiz_id, is_accepting_answers, created_at, updated_at";

/// Store backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PostgresPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Load the authoritative (most recently created) session row.
    pub(crate) async fn get_session(&self) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM quiz_sessions ORDER BY id DESC LIMIT 1"
        ))
        .fetch_optional(self.pool.pool())
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    /// Insert a new session that is live on `quiz_id` and accepting answers.
    pub(crate) async fn create_session(&self, quiz_id: QuizId) -> Result<Session, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "INSERT INTO quiz_sessions (current_quiz_id, is_accepting_answers)
             VALUES ($1, TRUE)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(quiz_id.into_inner())
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_reference_error)?;
        tracing::debug!(session_id = row.id, %quiz_id, "Created quiz session");
        Ok(row.into_session())
    }

    /// Point the authoritative session at another quiz and reopen voting.
    pub(crate) async fn switch_session_quiz(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE quiz_sessions
             SET current_quiz_id = $1, is_accepting_answers = TRUE, updated_at = now()
             WHERE id = (SELECT id FROM quiz_sessions ORDER BY id DESC LIMIT 1)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(quiz_id.into_inner())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_reference_error)?;
        Ok(row.map(SessionRow::into_session))
    }

    /// Open or close voting on the authoritative session.
    pub(crate) async fn set_accepting_answers(
        &self,
        accepting: bool,
    ) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE quiz_sessions
             SET is_accepting_answers = $1, updated_at = now()
             WHERE id = (SELECT id FROM quiz_sessions ORDER BY id DESC LIMIT 1)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(accepting)
        .fetch_optional(self.pool.pool())
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    /// Close voting and clear the live quiz on the authoritative session.
    pub(crate) async fn end_session(&self) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE quiz_sessions
             SET is_accepting_answers = FALSE, current_quiz_id = NULL, updated_at = now()
             WHERE id = (SELECT id FROM quiz_sessions ORDER BY id DESC LIMIT 1)
             RETURNING {SESSION_COLUMNS}"
        ))
        .fetch_optional(self.pool.pool())
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    // =========================================================================
    // Quizzes and participants
    // =========================================================================

    /// Load a quiz by id.
    pub(crate) async fn get_quiz(&self, quiz_id: QuizId) -> Result<Option<Quiz>, DbError> {
        let row = sqlx::query_as::<_, QuizRow>(
            r"SELECT id, question_text, option_a, option_b, option_c, option_d,
                     correct_answer, image_url, video_url
              FROM quizzes
              WHERE id = $1",
        )
        .bind(quiz_id.into_inner())
        .fetch_optional(self.pool.pool())
        .await?;
        row.map(QuizRow::into_quiz).transpose()
    }

    /// Load only the correct option of a quiz.
    pub(crate) async fn get_quiz_correct_answer(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<AnswerOption>, DbError> {
        let letter: Option<String> =
            sqlx::query_scalar("SELECT correct_answer FROM quizzes WHERE id = $1")
                .bind(quiz_id.into_inner())
                .fetch_optional(self.pool.pool())
                .await?;
        letter.as_deref().map(parse_option).transpose()
    }

    /// 1-based position of a quiz among all quizzes (ordered by id) and
    /// the total number of quizzes.
    pub(crate) async fn quiz_position(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<QuizPosition>, DbError> {
        let row: (bool, i64, i64) = sqlx::query_as(
            r"SELECT EXISTS (SELECT 1 FROM quizzes WHERE id = $1),
                     (SELECT COUNT(*) FROM quizzes WHERE id <= $1),
                     (SELECT COUNT(*) FROM quizzes)",
        )
        .bind(quiz_id.into_inner())
        .fetch_one(self.pool.pool())
        .await?;
        let (exists, ordinal, total) = row;
        Ok(exists.then(|| QuizPosition {
            question_number: clamp_count(ordinal),
            total_questions: clamp_count(total),
        }))
    }

    /// Whether a participant row exists.
    pub(crate) async fn participant_exists(&self, id: ParticipantId) -> Result<bool, DbError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM participants WHERE id = $1)")
                .bind(id.into_inner())
                .fetch_one(self.pool.pool())
                .await?;
        Ok(exists)
    }

    /// Load a participant by id.
    pub(crate) async fn get_participant(
        &self,
        id: ParticipantId,
    ) -> Result<Option<Participant>, DbError> {
        let row: Option<(i64, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, nickname, created_at FROM participants WHERE id = $1")
                .bind(id.into_inner())
                .fetch_optional(self.pool.pool())
                .await?;
        Ok(row.map(|(id, nickname, created_at)| Participant {
            id: ParticipantId(id),
            nickname,
            created_at,
        }))
    }

    /// Register a participant.
    pub(crate) async fn create_participant(&self, nickname: &str) -> Result<Participant, DbError> {
        let (id, nickname, created_at): (i64, String, DateTime<Utc>) = sqlx::query_as(
            r"INSERT INTO participants (nickname) VALUES ($1)
              RETURNING id, nickname, created_at",
        )
        .bind(nickname)
        .fetch_one(self.pool.pool())
        .await?;
        Ok(Participant {
            id: ParticipantId(id),
            nickname,
            created_at,
        })
    }

    /// Number of registered participants.
    pub(crate) async fn count_participants(&self) -> Result<u32, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(clamp_count(count))
    }

    // =========================================================================
    // Answers
    // =========================================================================

    /// Insert the participant's answer, or overwrite it if one exists.
    ///
    /// One statement: the unique constraint arbitrates concurrent writers
    /// and `xmax = 0` tells a fresh insert apart from an update.
    pub(crate) async fn upsert_answer(
        &self,
        participant_id: ParticipantId,
        quiz_id: QuizId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<UpsertOutcome, DbError> {
        let row = sqlx::query_as::<_, UpsertRow>(&format!(
            "INSERT INTO answers (participant_id, quiz_id, selected_option, is_correct, answered_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT ON CONSTRAINT answers_participant_quiz_key
             DO UPDATE SET selected_option = EXCLUDED.selected_option,
                           is_correct = EXCLUDED.is_correct,
                           answered_at = EXCLUDED.answered_at
             RETURNING {ANSWER_COLUMNS}, (xmax = 0) AS inserted"
        ))
        .bind(participant_id.into_inner())
        .bind(quiz_id.into_inner())
        .bind(selected.as_str())
        .bind(is_correct)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_reference_error)?;

        let created = row.inserted;
        let answer = row.answer.into_answer()?;
        tracing::debug!(
            answer_id = %answer.id,
            %participant_id,
            %quiz_id,
            created,
            "Upserted answer"
        );
        Ok(UpsertOutcome { answer, created })
    }

    /// Load an answer by id.
    pub(crate) async fn get_answer(&self, id: AnswerId) -> Result<Option<Answer>, DbError> {
        let row = sqlx::query_as::<_, AnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(self.pool.pool())
        .await?;
        row.map(AnswerRow::into_answer).transpose()
    }

    /// Overwrite the choice of an existing answer.
    pub(crate) async fn update_answer(
        &self,
        id: AnswerId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<Option<Answer>, DbError> {
        let row = sqlx::query_as::<_, AnswerRow>(&format!(
            "UPDATE answers
             SET selected_option = $1, is_correct = $2, answered_at = now()
             WHERE id = $3
             RETURNING {ANSWER_COLUMNS}"
        ))
        .bind(selected.as_str())
        .bind(is_correct)
        .bind(id.into_inner())
        .fetch_optional(self.pool.pool())
        .await?;
        row.map(AnswerRow::into_answer).transpose()
    }

    /// A participant's answers joined with their quizzes, newest first.
    pub(crate) async fn participant_answers(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantAnswer>, DbError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r"SELECT a.id AS answer_id, a.quiz_id, q.question_text, a.selected_option,
                     q.correct_answer, a.is_correct, a.answered_at
              FROM answers a
              JOIN quizzes q ON q.id = a.quiz_id
              WHERE a.participant_id = $1
              ORDER BY a.answered_at DESC, a.id DESC",
        )
        .bind(participant_id.into_inner())
        .fetch_all(self.pool.pool())
        .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    /// Participants who answered a quiz correctly, earliest first.
    pub(crate) async fn correct_participants(
        &self,
        quiz_id: QuizId,
    ) -> Result<Vec<CorrectParticipant>, DbError> {
        let rows: Vec<(i64, String, String, DateTime<Utc>)> = sqlx::query_as(
            r"SELECT p.id, p.nickname, a.selected_option, a.answered_at
              FROM answers a
              JOIN participants p ON p.id = a.participant_id
              WHERE a.quiz_id = $1 AND a.is_correct
              ORDER BY a.answered_at ASC, a.id ASC",
        )
        .bind(quiz_id.into_inner())
        .fetch_all(self.pool.pool())
        .await?;
        rows.into_iter()
            .map(|(id, nickname, letter, answered_at)| {
                Ok(CorrectParticipant {
                    participant_id: ParticipantId(id),
                    nickname,
                    selected_option: parse_option(&letter)?,
                    answered_at,
                })
            })
            .collect()
    }

    /// Number of answers per option for a quiz (options without answers
    /// are absent).
    pub(crate) async fn count_answers_by_option(
        &self,
        quiz_id: QuizId,
    ) -> Result<BTreeMap<AnswerOption, u32>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"SELECT selected_option, COUNT(*)
              FROM answers
              WHERE quiz_id = $1
              GROUP BY selected_option",
        )
        .bind(quiz_id.into_inner())
        .fetch_all(self.pool.pool())
        .await?;

        let mut counts = BTreeMap::new();
        for (letter, count) in rows {
            counts.insert(parse_option(&letter)?, clamp_count(count));
        }
        Ok(counts)
    }

    // =========================================================================
    // Ranking
    // =========================================================================

    /// Overall participant ranking.
    ///
    /// Ordered by score, then accuracy, then number of answers (all
    /// descending) with the participant id as the final tie-break so the
    /// order is total and stable across pages.
    pub(crate) async fn overall_ranking(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RankingEntry>, DbError> {
        let rows = sqlx::query_as::<_, RankingRow>(
            r"SELECT p.id AS participant_id,
                     p.nickname,
                     COUNT(a.id) AS total_answers,
                     COALESCE(SUM(CASE WHEN a.is_correct THEN 1 ELSE 0 END), 0)::BIGINT AS correct_answers,
                     CASE WHEN COUNT(a.id) > 0
                          THEN SUM(CASE WHEN a.is_correct THEN 1 ELSE 0 END)::FLOAT8 / COUNT(a.id)
                          ELSE 0::FLOAT8
                     END AS accuracy_rate
              FROM participants p
              LEFT JOIN answers a ON a.participant_id = p.id
              GROUP BY p.id, p.nickname
              ORDER BY correct_answers DESC, accuracy_rate DESC, total_answers DESC, p.id ASC
              LIMIT $1 OFFSET $2",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.pool.pool())
        .await?;

        let mut rank = offset;
        let mut ranking = Vec::with_capacity(rows.len());
        for row in rows {
            rank = rank.saturating_add(1);
            let correct = clamp_count(row.correct_answers);
            ranking.push(RankingEntry {
                rank,
                participant_id: ParticipantId(row.participant_id),
                nickname: row.nickname,
                total_answers: clamp_count(row.total_answers),
                correct_answers: correct,
                accuracy_rate: row.accuracy_rate,
                total_score: correct,
            });
        }
        Ok(ranking)
    }

    /// Number of participants strictly ahead of the given totals under the
    /// overall ranking order.
    pub(crate) async fn count_ranked_above(
        &self,
        correct: u32,
        accuracy: f64,
        total: u32,
    ) -> Result<u32, DbError> {
        let ahead: i64 = sqlx::query_scalar(
            r"SELECT COUNT(*)
              FROM (
                  SELECT COALESCE(SUM(CASE WHEN a.is_correct THEN 1 ELSE 0 END), 0) AS score,
                         CASE WHEN COUNT(a.id) > 0
                              THEN SUM(CASE WHEN a.is_correct THEN 1 ELSE 0 END)::FLOAT8
                                   / COUNT(a.id)
                              ELSE 0::FLOAT8
                         END AS accuracy,
                         COUNT(a.id) AS answered
                  FROM participants p
                  LEFT JOIN answers a ON a.participant_id = p.id
                  GROUP BY p.id
              ) totals
              WHERE totals.score > $1
                 OR (totals.score = $1 AND totals.accuracy > $2)
                 OR (totals.score = $1 AND totals.accuracy = $2 AND totals.answered > $3)",
        )
        .bind(i64::from(correct))
        .bind(accuracy)
        .bind(i64::from(total))
        .fetch_one(self.pool.pool())
        .await?;
        Ok(clamp_count(ahead))
    }
}

// =============================================================================
// Row types
// =============================================================================

/// Raw row from the `quiz_sessions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRow {
    id: i64,
    current_quiz_id: Option<i64>,
    is_accepting_answers: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session {
            id: SessionId(self.id),
            current_quiz_id: self.current_quiz_id.map(QuizId),
            is_accepting_answers: self.is_accepting_answers,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Raw row from the `quizzes` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct QuizRow {
    id: i64,
    question_text: String,
    option_a: String,
    option_b: String,
    option_c: String,
    option_d: String,
    correct_answer: String,
    image_url: Option<String>,
    video_url: Option<String>,
}

impl QuizRow {
    fn into_quiz(self) -> Result<Quiz, DbError> {
        Ok(Quiz {
            id: QuizId(self.id),
            question_text: self.question_text,
            option_a: self.option_a,
            option_b: self.option_b,
            option_c: self.option_c,
            option_d: self.option_d,
            correct_answer: parse_option(&self.correct_answer)?,
            image_url: self.image_url,
            video_url: self.video_url,
        })
    }
}

/// Raw row from the `answers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct AnswerRow {
    id: i64,
    participant_id: i64,
    quiz_id: i64,
    selected_option: String,
    is_correct: bool,
    answered_at: DateTime<Utc>,
}

impl AnswerRow {
    fn into_answer(self) -> Result<Answer, DbError> {
        Ok(Answer {
            id: AnswerId(self.id),
            participant_id: ParticipantId(self.participant_id),
            quiz_id: QuizId(self.quiz_id),
            selected_option: parse_option(&self.selected_option)?,
            is_correct: self.is_correct,
            answered_at: self.answered_at,
        })
    }
}

/// Answer row plus the insert/update discriminator from the upsert.
#[derive(Debug, Clone, sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    answer: AnswerRow,
    inserted: bool,
}

/// One entry of a participant's answer history.
#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRow {
    answer_id: i64,
    quiz_id: i64,
    question_text: String,
    selected_option: String,
    correct_answer: String,
    is_correct: bool,
    answered_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> Result<ParticipantAnswer, DbError> {
        Ok(ParticipantAnswer {
            answer_id: AnswerId(self.answer_id),
            quiz_id: QuizId(self.quiz_id),
            question_text: self.question_text,
            selected_option: parse_option(&self.selected_option)?,
            correct_answer: parse_option(&self.correct_answer)?,
            is_correct: self.is_correct,
            answered_at: self.answered_at,
        })
    }
}

/// One aggregated ranking row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct RankingRow {
    participant_id: i64,
    nickname: String,
    total_answers: i64,
    correct_answers: i64,
    accuracy_rate: f64,
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_option(letter: &str) -> Result<AnswerOption, DbError> {
    letter
        .parse()
        .map_err(|e: quizcast_types::InvalidAnswerOption| DbError::Corrupt(e.to_string()))
}

/// Convert a `COUNT(*)` result into the `u32` used by the wire types.
fn clamp_count(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Surface foreign key violations as [`DbError::MissingReference`].
fn map_reference_error(err: sqlx::Error) -> DbError {
    let violation = err
        .as_database_error()
        .filter(|db_err| db_err.is_foreign_key_violation())
        .map(|db_err| db_err.message().to_owned());
    violation.map_or_else(|| DbError::Postgres(err), DbError::MissingReference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_count_saturates() {
        assert_eq!(clamp_count(-1), 0);
        assert_eq!(clamp_count(12), 12);
        assert_eq!(clamp_count(i64::MAX), u32::MAX);
    }

    #[test]
    fn corrupt_option_letters_are_reported() {
        assert!(matches!(parse_option("Z"), Err(DbError::Corrupt(_))));
        assert_eq!(parse_option("B").ok(), Some(AnswerOption::B));
    }
}
