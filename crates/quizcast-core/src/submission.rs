//! Answer submission.
//!
//! Every check runs before the store is written, in a fixed order:
//! session present, voting open, quiz is the live one, participant
//! exists, quiz exists. Only then is the answer upserted (with
//! `is_correct` derived at write time) and the fresh tally pushed to the
//! quiz's observers. Broadcast problems are logged and never change the
//! outcome reported to the submitter.

use std::sync::Arc;

use quizcast_db::{DbError, Store};
use quizcast_types::{
    Answer, AnswerId, AnswerOption, ParticipantId, QuizId, ServerMessage, Session,
};

use crate::aggregator::ResultAggregator;
use crate::broadcaster::Broadcaster;
use crate::registry::Topic;

/// Why a submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// No session row exists.
    #[error("no active session")]
    NoActiveSession,

    /// The session is not accepting answers.
    #[error("answers are not currently accepted")]
    AnswersNotAccepted,

    /// The answer targets a quiz other than the live one.
    #[error("quiz {requested} is not the active quiz")]
    InvalidQuiz {
        /// The quiz named in the request.
        requested: QuizId,
        /// The live quiz, if any.
        current: Option<QuizId>,
    },

    /// The participant does not exist.
    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    /// The quiz does not exist.
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),

    /// The answer to update does not exist.
    #[error("answer {0} not found")]
    AnswerNotFound(AnswerId),

    /// The store failed or timed out.
    #[error(transparent)]
    Database(#[from] DbError),
}

impl SubmissionError {
    /// Stable error code for API responses.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::AnswersNotAccepted => "ANSWERS_NOT_ACCEPTED",
            Self::InvalidQuiz { .. } => "INVALID_QUIZ",
            Self::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            Self::QuizNotFound(_) => "QUIZ_NOT_FOUND",
            Self::AnswerNotFound(_) => "ANSWER_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// A participant's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitAnswer {
    /// Who votes.
    pub participant_id: ParticipantId,
    /// Which quiz.
    pub quiz_id: QuizId,
    /// The chosen option.
    pub selected_option: AnswerOption,
}

/// The persisted answer and whether it was newly created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    /// The stored answer.
    pub answer: Answer,
    /// `true` for a first answer, `false` for an overwrite.
    pub created: bool,
}

/// Validates, persists and publishes answers.
#[derive(Debug, Clone)]
pub struct SubmissionCoordinator {
    store: Store,
    aggregator: ResultAggregator,
    broadcaster: Arc<Broadcaster>,
}

impl SubmissionCoordinator {
    /// Create a coordinator.
    pub const fn new(
        store: Store,
        aggregator: ResultAggregator,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            aggregator,
            broadcaster,
        }
    }

    /// Record a vote. Resubmitting for the same quiz overwrites the
    /// previous choice.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`SubmissionError`]; nothing is
    /// written in that case.
    pub async fn submit(
        &self,
        request: SubmitAnswer,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let session = self.open_session().await?;
        if session.current_quiz_id != Some(request.quiz_id) {
            return Err(SubmissionError::InvalidQuiz {
                requested: request.quiz_id,
                current: session.current_quiz_id,
            });
        }
        if !self.store.participant_exists(request.participant_id).await? {
            return Err(SubmissionError::ParticipantNotFound(request.participant_id));
        }
        let correct = self
            .store
            .get_quiz_correct_answer(request.quiz_id)
            .await?
            .ok_or(SubmissionError::QuizNotFound(request.quiz_id))?;

        let upsert = self
            .store
            .upsert_answer(
                request.participant_id,
                request.quiz_id,
                request.selected_option,
                request.selected_option == correct,
            )
            .await;
        let outcome = match upsert {
            Ok(outcome) => outcome,
            Err(DbError::MissingReference(reference)) => {
                tracing::debug!(%reference, "Reference vanished before the upsert");
                return Err(self.vanished_reference(&request).await);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            participant_id = %request.participant_id,
            quiz_id = %request.quiz_id,
            selected = %request.selected_option,
            created = outcome.created,
            "Answer recorded"
        );

        self.publish(request.quiz_id, session.is_accepting_answers).await;

        Ok(SubmissionOutcome {
            answer: outcome.answer,
            created: outcome.created,
        })
    }

    /// Change the option of an existing answer, identified by id.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] if voting is closed, the answer does
    /// not exist or belongs to a quiz that is no longer live.
    pub async fn update(
        &self,
        answer_id: AnswerId,
        selected_option: AnswerOption,
    ) -> Result<Answer, SubmissionError> {
        let session = self.open_session().await?;
        let existing = self
            .store
            .get_answer(answer_id)
            .await?
            .ok_or(SubmissionError::AnswerNotFound(answer_id))?;
        if session.current_quiz_id != Some(existing.quiz_id) {
            return Err(SubmissionError::InvalidQuiz {
                requested: existing.quiz_id,
                current: session.current_quiz_id,
            });
        }
        let correct = self
            .store
            .get_quiz_correct_answer(existing.quiz_id)
            .await?
            .ok_or(SubmissionError::QuizNotFound(existing.quiz_id))?;

        let answer = self
            .store
            .update_answer(answer_id, selected_option, selected_option == correct)
            .await?
            .ok_or(SubmissionError::AnswerNotFound(answer_id))?;

        tracing::info!(
            answer_id = %answer_id,
            quiz_id = %answer.quiz_id,
            selected = %selected_option,
            "Answer updated"
        );

        self.publish(answer.quiz_id, session.is_accepting_answers).await;
        Ok(answer)
    }

    /// Name the row that was deleted between the existence checks and the
    /// upsert.
    async fn vanished_reference(&self, request: &SubmitAnswer) -> SubmissionError {
        match self.store.participant_exists(request.participant_id).await {
            Ok(false) => SubmissionError::ParticipantNotFound(request.participant_id),
            Ok(true) => SubmissionError::QuizNotFound(request.quiz_id),
            Err(e) => e.into(),
        }
    }

    /// Load the authoritative session and require it to be accepting.
    async fn open_session(&self) -> Result<Session, SubmissionError> {
        let session = self
            .store
            .get_session()
            .await?
            .ok_or(SubmissionError::NoActiveSession)?;
        if !session.is_accepting_answers {
            return Err(SubmissionError::AnswersNotAccepted);
        }
        Ok(session)
    }

    /// Push `answer_status` and `result_update` to the quiz's observers.
    async fn publish(&self, quiz_id: QuizId, accepting: bool) {
        let topic = Topic::Quiz(quiz_id);

        match self.aggregator.answer_status(quiz_id).await {
            Ok(status) => {
                self.broadcaster
                    .broadcast(topic, &ServerMessage::AnswerStatus(status))
                    .await;
            }
            Err(e) => tracing::warn!(%quiz_id, error = %e, "Failed to compute answer status"),
        }

        match self.aggregator.compute_with_state(quiz_id, Some(accepting)).await {
            Ok(Some(results)) => {
                self.broadcaster
                    .broadcast(topic, &ServerMessage::ResultUpdate(results))
                    .await;
            }
            Ok(None) => tracing::warn!(%quiz_id, "Quiz vanished before tally"),
            Err(e) => tracing::warn!(%quiz_id, error = %e, "Failed to compute results"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use quizcast_db::MemoryStore;
    use quizcast_types::Quiz;

    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::{ConnectionHandle, ConnectionInbox, ConnectionRegistry, OutboundFrame};

    struct Fixture {
        memory: MemoryStore,
        store: Store,
        registry: Arc<ConnectionRegistry>,
        coordinator: SubmissionCoordinator,
    }

    fn quiz(id: i64, correct: AnswerOption) -> Quiz {
        Quiz {
            id: QuizId(id),
            question_text: format!("Q{id}"),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: "c".into(),
            option_d: "d".into(),
            correct_answer: correct,
            image_url: None,
            video_url: None,
        }
    }

    async fn fixture() -> Fixture {
        let memory = MemoryStore::new();
        memory.insert_quiz(quiz(1, AnswerOption::B)).await;
        memory.insert_quiz(quiz(2, AnswerOption::C)).await;
        let store = Store::memory(memory.clone());
        let clock = Arc::new(SystemClock);
        let registry = Arc::new(ConnectionRegistry::new(8, clock.clone()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let aggregator = ResultAggregator::new(store.clone(), clock);
        let coordinator = SubmissionCoordinator::new(store.clone(), aggregator, broadcaster);
        Fixture {
            memory,
            store,
            registry,
            coordinator,
        }
    }

    async fn observer(registry: &ConnectionRegistry, quiz: i64) -> ConnectionInbox {
        let (handle, inbox) = ConnectionHandle::channel(16);
        let id = handle.id();
        registry.admit(handle).await.unwrap();
        registry.set_subscription(id, Some(QuizId(quiz))).await;
        inbox
    }

    fn kinds(inbox: &mut ConnectionInbox) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(OutboundFrame::Text(text)) = inbox.outbound.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            kinds.push(value["type"].as_str().unwrap_or_default().to_owned());
        }
        kinds
    }

    fn vote(participant: ParticipantId, quiz: i64, option: AnswerOption) -> SubmitAnswer {
        SubmitAnswer {
            participant_id: participant,
            quiz_id: QuizId(quiz),
            selected_option: option,
        }
    }

    #[tokio::test]
    async fn without_session_nothing_is_written() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        let err = f.coordinator.submit(vote(p.id, 1, AnswerOption::B)).await.unwrap_err();
        assert_eq!(err.code(), "NO_ACTIVE_SESSION");
        assert!(f.store.count_answers_by_option(QuizId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_voting_wins_over_quiz_mismatch() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();
        f.store.set_accepting_answers(false).await.unwrap();

        for quiz in [1, 2, 99] {
            let err = f
                .coordinator
                .submit(vote(p.id, quiz, AnswerOption::A))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "ANSWERS_NOT_ACCEPTED");
        }
        assert!(f.store.count_answers_by_option(QuizId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checks_run_in_order() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();

        let err = f.coordinator.submit(vote(p.id, 2, AnswerOption::A)).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::InvalidQuiz {
                requested: QuizId(2),
                current: Some(QuizId(1))
            }
        ));

        let err = f
            .coordinator
            .submit(vote(ParticipantId(404), 1, AnswerOption::A))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PARTICIPANT_NOT_FOUND");
    }

    #[tokio::test]
    async fn foreign_key_race_reports_the_missing_row() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();

        let err = f
            .coordinator
            .vanished_reference(&vote(ParticipantId(404), 1, AnswerOption::A))
            .await;
        assert_eq!(err.code(), "PARTICIPANT_NOT_FOUND");

        let err = f
            .coordinator
            .vanished_reference(&vote(p.id, 77, AnswerOption::A))
            .await;
        assert!(matches!(err, SubmissionError::QuizNotFound(QuizId(77))));
    }

    #[tokio::test]
    async fn correctness_is_derived_and_last_write_wins() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();

        let first = f.coordinator.submit(vote(p.id, 1, AnswerOption::B)).await.unwrap();
        assert!(first.created);
        assert!(first.answer.is_correct);

        let second = f.coordinator.submit(vote(p.id, 1, AnswerOption::D)).await.unwrap();
        assert!(!second.created);
        assert!(!second.answer.is_correct);
        assert_eq!(second.answer.id, first.answer.id);
    }

    #[tokio::test]
    async fn submission_publishes_to_quiz_observers_only() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();
        let mut watching = observer(&f.registry, 1).await;
        let mut elsewhere = observer(&f.registry, 2).await;

        f.coordinator.submit(vote(p.id, 1, AnswerOption::B)).await.unwrap();

        assert_eq!(kinds(&mut watching), vec!["answer_status", "result_update"]);
        assert!(kinds(&mut elsewhere).is_empty());
    }

    #[tokio::test]
    async fn update_by_id_recomputes_correctness() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();
        let first = f.coordinator.submit(vote(p.id, 1, AnswerOption::A)).await.unwrap();

        let updated = f
            .coordinator
            .update(first.answer.id, AnswerOption::B)
            .await
            .unwrap();
        assert!(updated.is_correct);
        assert_eq!(updated.id, first.answer.id);

        let err = f
            .coordinator
            .update(AnswerId(9_999), AnswerOption::B)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ANSWER_NOT_FOUND");

        f.store.switch_session_quiz(QuizId(2)).await.unwrap();
        let err = f
            .coordinator
            .update(first.answer.id, AnswerOption::C)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_QUIZ");
    }

    #[tokio::test]
    async fn store_timeout_is_a_database_error() {
        let f = fixture().await;
        let p = f.store.create_participant("a").await.unwrap();
        f.store.create_session(QuizId(1)).await.unwrap();
        f.memory.set_latency(Some(Duration::from_millis(200))).await;

        let store = f.store.clone().with_query_timeout(Duration::from_millis(20));
        let registry = Arc::new(ConnectionRegistry::new(1, Arc::new(SystemClock)));
        let coordinator = SubmissionCoordinator::new(
            store.clone(),
            ResultAggregator::new(store, Arc::new(SystemClock)),
            Arc::new(Broadcaster::new(registry)),
        );
        let err = coordinator.submit(vote(p.id, 1, AnswerOption::B)).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
    }
}
