//! Tallies and rankings derived from the answer rows.
//!
//! Nothing here is cached. Every call re-reads the store, so a tally is
//! always consistent with the answers committed before the read.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quizcast_db::{DbError, Store};
use quizcast_types::{
    AnswerOption, AnswerStatus, OptionResult, OverallRanking, ParticipantAnswer,
    ParticipantAnswers, ParticipantId, ParticipantRanking, ParticipantSummary, Quiz, QuizId,
    QuizRanking, QuizResults,
};

use crate::clock::Clock;

/// `part / total * 100`, or `0` when `total` is zero.
pub fn percentage(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(part) / f64::from(total) * 100.0
}

/// `correct / total` as a fraction, or `0` when `total` is zero.
pub fn accuracy_rate(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(correct) / f64::from(total)
}

/// Number of answers and of correct answers in a history.
fn history_totals(history: &[ParticipantAnswer]) -> (u32, u32) {
    let total = u32::try_from(history.len()).unwrap_or(u32::MAX);
    let correct = history.iter().filter(|a| a.is_correct).count();
    let correct = u32::try_from(correct).unwrap_or(u32::MAX);
    (total, correct)
}

/// Build the tally of `quiz` from per-option counts.
///
/// Options missing from `counts` are reported with a zero count.
pub fn tally(
    quiz: &Quiz,
    counts: &BTreeMap<AnswerOption, u32>,
    is_accepting_answers: Option<bool>,
    now: DateTime<Utc>,
) -> QuizResults {
    let total = counts.values().fold(0_u32, |acc, n| acc.saturating_add(*n));
    let results = AnswerOption::ALL
        .into_iter()
        .map(|option| {
            let count = counts.get(&option).copied().unwrap_or(0);
            (
                option,
                OptionResult {
                    count,
                    percentage: percentage(count, total),
                },
            )
        })
        .collect();
    let correct_count = counts.get(&quiz.correct_answer).copied().unwrap_or(0);

    QuizResults {
        quiz_id: quiz.id,
        question_text: quiz.question_text.clone(),
        total_answers: total,
        results,
        correct_answer: quiz.correct_answer,
        correct_count,
        correct_percentage: percentage(correct_count, total),
        is_accepting_answers,
        updated_at: now,
    }
}

/// Computes tallies, live answer status and rankings.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl ResultAggregator {
    /// Create an aggregator reading from `store`.
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Tally a quiz. Returns `None` if the quiz does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn compute(&self, quiz_id: QuizId) -> Result<Option<QuizResults>, DbError> {
        self.compute_with_state(quiz_id, None).await
    }

    /// Tally a quiz, annotated with the session's acceptance flag.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn compute_with_state(
        &self,
        quiz_id: QuizId,
        is_accepting_answers: Option<bool>,
    ) -> Result<Option<QuizResults>, DbError> {
        let Some(quiz) = self.store.get_quiz(quiz_id).await? else {
            return Ok(None);
        };
        let counts = self.store.count_answers_by_option(quiz_id).await?;
        Ok(Some(tally(
            &quiz,
            &counts,
            is_accepting_answers,
            self.clock.now(),
        )))
    }

    /// Live answer counts for a quiz, against the number of registered
    /// participants.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn answer_status(&self, quiz_id: QuizId) -> Result<AnswerStatus, DbError> {
        let counts = self.store.count_answers_by_option(quiz_id).await?;
        let total_participants = self.store.count_participants().await?;
        let answered_count = counts.values().fold(0_u32, |acc, n| acc.saturating_add(*n));
        let answer_counts = AnswerOption::ALL
            .into_iter()
            .map(|option| (option, counts.get(&option).copied().unwrap_or(0)))
            .collect();

        Ok(AnswerStatus {
            quiz_id,
            question_id: quiz_id,
            total_participants,
            answered_count,
            answer_counts,
            updated_at: self.clock.now(),
        })
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
    ) -> Result<OverallRanking, DbError> {
        let total_participants = self.store.count_participants().await?;
        let ranking = self.store.overall_ranking(limit, offset).await?;
        Ok(OverallRanking {
            ranking,
            total_participants,
            updated_at: self.clock.now(),
        })
    }

    /// Who answered a quiz correctly. `None` if the quiz does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn quiz_ranking(&self, quiz_id: QuizId) -> Result<Option<QuizRanking>, DbError> {
        let Some(quiz) = self.store.get_quiz(quiz_id).await? else {
            return Ok(None);
        };
        let counts = self.store.count_answers_by_option(quiz_id).await?;
        let correct_participants = self.store.correct_participants(quiz_id).await?;
        let total_answers = counts.values().fold(0_u32, |acc, n| acc.saturating_add(*n));
        let total_correct = u32::try_from(correct_participants.len()).unwrap_or(u32::MAX);

        Ok(Some(QuizRanking {
            quiz_id,
            question_text: quiz.question_text,
            correct_participants,
            total_correct,
            total_answers,
            correct_percentage: percentage(total_correct, total_answers),
        }))
    }

    /// A participant's standing in the overall ranking. `None` if the
    /// participant does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn participant_ranking(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<ParticipantRanking>, DbError> {
        let Some(participant) = self.store.get_participant(participant_id).await? else {
            return Ok(None);
        };
        let history = self.store.participant_answers(participant_id).await?;
        let (total_answers, correct_answers) = history_totals(&history);
        let accuracy = accuracy_rate(correct_answers, total_answers);
        let ahead = self
            .store
            .count_ranked_above(correct_answers, accuracy, total_answers)
            .await?;
        let total_participants = self.store.count_participants().await?;

        Ok(Some(ParticipantRanking {
            participant_id,
            nickname: participant.nickname,
            current_rank: ahead.saturating_add(1),
            total_participants,
            total_answers,
            correct_answers,
            accuracy_rate: accuracy,
            total_score: correct_answers,
            percentile: percentage(total_participants.saturating_sub(ahead), total_participants),
        }))
    }

    /// A participant with answer totals. `None` if the participant does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn participant_summary(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<ParticipantSummary>, DbError> {
        let Some(participant) = self.store.get_participant(participant_id).await? else {
            return Ok(None);
        };
        let history = self.store.participant_answers(participant_id).await?;
        let (total_answers, correct_answers) = history_totals(&history);
        Ok(Some(ParticipantSummary {
            id: participant.id,
            nickname: participant.nickname,
            created_at: participant.created_at,
            total_answers,
            correct_answers,
        }))
    }

    /// A participant's answer history. `None` if the participant does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on store failure or timeout.
    pub async fn participant_answers(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<ParticipantAnswers>, DbError> {
        if !self.store.participant_exists(participant_id).await? {
            return Ok(None);
        }
        let answers = self.store.participant_answers(participant_id).await?;
        let (total_answers, correct_answers) = history_totals(&answers);
        Ok(Some(ParticipantAnswers {
            participant_id,
            answers,
            total_answers,
            correct_answers,
            accuracy_rate: accuracy_rate(correct_answers, total_answers),
        }))
    }
}
