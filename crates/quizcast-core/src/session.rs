//! Moderator control of the quiz session.
//!
//! Each action writes the session row first and then tells observers:
//! `question_switch` and `session_update` go to every connection,
//! `voting_end` only to the closed quiz's subscribers.

use std::sync::Arc;

use quizcast_db::{DbError, Store};
use quizcast_types::{
    QuestionSwitch, Quiz, QuizId, ServerMessage, Session, SessionStatus, SessionUpdate,
    SessionView, VotingEnd,
};

use crate::broadcaster::Broadcaster;
use crate::clock::Clock;
use crate::registry::Topic;

/// Why a session action was refused.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session has been started yet.
    #[error("no active session")]
    NoActiveSession,

    /// The quiz does not exist.
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),

    /// The store failed or timed out.
    #[error(transparent)]
    Database(#[from] DbError),
}

impl SessionError {
    /// Stable error code for API responses.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::QuizNotFound(_) => "QUIZ_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Drives session transitions and announces them.
#[derive(Debug, Clone)]
pub struct SessionControl {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl SessionControl {
    /// Create a session controller.
    pub fn new(store: Store, broadcaster: Arc<Broadcaster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            broadcaster,
            clock,
        }
    }

    /// Start a new session on `quiz_id` with voting open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QuizNotFound`] for an unknown quiz.
    pub async fn start(&self, quiz_id: QuizId) -> Result<Session, SessionError> {
        let quiz = self.require_quiz(quiz_id).await?;
        let session = self.store.create_session(quiz_id).await?;
        tracing::info!(session_id = %session.id, %quiz_id, "Session started");

        self.announce_question(&quiz).await;
        self.announce_session(&session, Some(&quiz), SessionStatus::Started)
            .await;
        Ok(session)
    }

    /// Move the session to `quiz_id` and reopen voting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QuizNotFound`] for an unknown quiz or
    /// [`SessionError::NoActiveSession`] before the first start.
    pub async fn next(&self, quiz_id: QuizId) -> Result<Session, SessionError> {
        let quiz = self.require_quiz(quiz_id).await?;
        let session = self
            .store
            .switch_session_quiz(quiz_id)
            .await?
            .ok_or(SessionError::NoActiveSession)?;
        tracing::info!(session_id = %session.id, %quiz_id, "Question switched");

        self.announce_question(&quiz).await;
        self.announce_session(&session, Some(&quiz), SessionStatus::QuestionChanged)
            .await;
        Ok(session)
    }

    /// Open or close voting on the live quiz.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActiveSession`] before the first start.
    pub async fn set_accepting(&self, accepting: bool) -> Result<Session, SessionError> {
        let session = self
            .store
            .set_accepting_answers(accepting)
            .await?
            .ok_or(SessionError::NoActiveSession)?;
        tracing::info!(session_id = %session.id, accepting, "Answer acceptance changed");

        if let Some(quiz_id) = session.current_quiz_id.filter(|_| !accepting) {
            let message = ServerMessage::VotingEnd(VotingEnd {
                quiz_id,
                question_id: quiz_id,
                ended_at: self.clock.now(),
            });
            self.broadcaster
                .broadcast(Topic::Quiz(quiz_id), &message)
                .await;
        }

        let quiz = self.current_quiz(&session).await;
        self.announce_session(&session, quiz.as_ref(), SessionStatus::AnswerAcceptanceToggled)
            .await;
        Ok(session)
    }

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActiveSession`] before the first start.
    pub async fn end(&self) -> Result<Session, SessionError> {
        let session = self
            .store
            .end_session()
            .await?
            .ok_or(SessionError::NoActiveSession)?;
        tracing::info!(session_id = %session.id, "Session ended");

        self.announce_session(&session, None, SessionStatus::Ended)
            .await;
        Ok(session)
    }

    /// The public view of the current session. Without any session the
    /// view is empty rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Database`] on store failure.
    pub async fn status(&self) -> Result<SessionView, SessionError> {
        let total_participants = self.store.count_participants().await?;
        let Some(session) = self.store.get_session().await? else {
            return Ok(SessionView {
                session_id: None,
                current_quiz: None,
                is_accepting_answers: false,
                total_participants,
                answers_count: 0,
            });
        };

        let (current_quiz, answers_count) = match session.current_quiz_id {
            Some(quiz_id) => {
                let quiz = self.store.get_quiz(quiz_id).await?;
                let counts = self.store.count_answers_by_option(quiz_id).await?;
                (
                    quiz.as_ref().map(Quiz::to_public),
                    counts.values().fold(0_u32, |acc, n| acc.saturating_add(*n)),
                )
            }
            None => (None, 0),
        };

        Ok(SessionView {
            session_id: Some(session.id),
            current_quiz,
            is_accepting_answers: session.is_accepting_answers,
            total_participants,
            answers_count,
        })
    }

    async fn require_quiz(&self, quiz_id: QuizId) -> Result<Quiz, SessionError> {
        self.store
            .get_quiz(quiz_id)
            .await?
            .ok_or(SessionError::QuizNotFound(quiz_id))
    }

    async fn current_quiz(&self, session: &Session) -> Option<Quiz> {
        let quiz_id = session.current_quiz_id?;
        match self.store.get_quiz(quiz_id).await {
            Ok(quiz) => quiz,
            Err(e) => {
                tracing::warn!(%quiz_id, error = %e, "Failed to load live quiz for announcement");
                None
            }
        }
    }

    async fn announce_question(&self, quiz: &Quiz) {
        let position = match self.store.quiz_position(quiz.id).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                tracing::warn!(quiz_id = %quiz.id, "Quiz vanished before question switch");
                return;
            }
            Err(e) => {
                tracing::warn!(quiz_id = %quiz.id, error = %e, "Failed to load quiz position");
                return;
            }
        };
        let message = ServerMessage::QuestionSwitch(QuestionSwitch {
            quiz_id: quiz.id,
            question_number: position.question_number,
            total_questions: position.total_questions,
            switched_at: self.clock.now(),
        });
        self.broadcaster.broadcast(Topic::All, &message).await;
    }

    async fn announce_session(
        &self,
        session: &Session,
        quiz: Option<&Quiz>,
        status: SessionStatus,
    ) {
        let message = ServerMessage::SessionUpdate(SessionUpdate {
            session_id: Some(session.id),
            current_quiz: quiz.map(Quiz::to_public),
            is_accepting_answers: session.is_accepting_answers,
            status,
            updated_at: self.clock.now(),
        });
        self.broadcaster.broadcast(Topic::All, &message).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use quizcast_db::MemoryStore;
    use quizcast_types::AnswerOption;

    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::{ConnectionHandle, ConnectionInbox, ConnectionRegistry, OutboundFrame};

    fn quiz(id: i64) -> Quiz {
        Quiz {
            id: QuizId(id),
            question_text: format!("Q{id}"),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: "c".into(),
            option_d: "d".into(),
            correct_answer: AnswerOption::A,
            image_url: None,
            video_url: None,
        }
    }

    async fn setup() -> (SessionControl, Arc<ConnectionRegistry>, Store) {
        let memory = MemoryStore::new();
        for id in [10, 20, 30] {
            memory.insert_quiz(quiz(id)).await;
        }
        let store = Store::memory(memory);
        let clock = Arc::new(SystemClock);
        let registry = Arc::new(ConnectionRegistry::new(8, clock.clone()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        (
            SessionControl::new(store.clone(), broadcaster, clock),
            registry,
            store,
        )
    }

    async fn observer(registry: &ConnectionRegistry, quiz: Option<i64>) -> ConnectionInbox {
        let (handle, inbox) = ConnectionHandle::channel(16);
        let id = handle.id();
        registry.admit(handle).await.unwrap();
        registry.set_subscription(id, quiz.map(QuizId)).await;
        inbox
    }

    fn drain(inbox: &mut ConnectionInbox) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(OutboundFrame::Text(text)) = inbox.outbound.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn start_announces_question_position_to_everyone() {
        let (control, registry, _) = setup().await;
        let mut idle = observer(&registry, None).await;

        control.start(QuizId(20)).await.unwrap();

        let frames = drain(&mut idle);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "question_switch");
        assert_eq!(frames[0]["data"]["question_number"], 2);
        assert_eq!(frames[0]["data"]["total_questions"], 3);
        assert_eq!(frames[1]["type"], "session_update");
        assert_eq!(frames[1]["data"]["status"], "started");
        assert!(frames[1]["data"]["current_quiz"].get("correct_answer").is_none());
    }

    #[tokio::test]
    async fn closing_voting_notifies_quiz_subscribers() {
        let (control, registry, _) = setup().await;
        control.start(QuizId(10)).await.unwrap();
        let mut on_quiz = observer(&registry, Some(10)).await;
        let mut elsewhere = observer(&registry, Some(30)).await;

        let session = control.set_accepting(false).await.unwrap();
        assert!(!session.is_accepting_answers);

        let kinds: Vec<_> = drain(&mut on_quiz)
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(kinds, vec!["voting_end", "session_update"]);
        let other: Vec<_> = drain(&mut elsewhere);
        assert_eq!(other.len(), 1);
        assert_eq!(other[0]["type"], "session_update");
    }

    #[tokio::test]
    async fn actions_before_start_fail() {
        let (control, _, _) = setup().await;
        assert_eq!(control.next(QuizId(10)).await.unwrap_err().code(), "NO_ACTIVE_SESSION");
        assert_eq!(control.set_accepting(true).await.unwrap_err().code(), "NO_ACTIVE_SESSION");
        assert_eq!(control.end().await.unwrap_err().code(), "NO_ACTIVE_SESSION");
        assert_eq!(control.start(QuizId(99)).await.unwrap_err().code(), "QUIZ_NOT_FOUND");
    }

    #[tokio::test]
    async fn status_reflects_the_live_quiz() {
        let (control, _, store) = setup().await;
        let empty = control.status().await.unwrap();
        assert!(empty.session_id.is_none());

        control.start(QuizId(10)).await.unwrap();
        let p = store.create_participant("ann").await.unwrap();
        store
            .upsert_answer(p.id, QuizId(10), AnswerOption::A, true)
            .await
            .unwrap();
        control.next(QuizId(30)).await.unwrap();

        let view = control.status().await.unwrap();
        assert_eq!(view.current_quiz.map(|q| q.id), Some(QuizId(30)));
        assert!(view.is_accepting_answers);
        assert_eq!(view.total_participants, 1);
        assert_eq!(view.answers_count, 0);

        control.end().await.unwrap();
        let ended = control.status().await.unwrap();
        assert!(ended.current_quiz.is_none());
        assert!(!ended.is_accepting_answers);
    }
}
