//! End-to-end vote flow over the in-memory store: a moderator opens a
//! session, an observer subscribes, a participant votes and changes their
//! mind, and the observer sees each tally.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]

use std::sync::Arc;

use quizcast_core::{
    Broadcaster, ConnectionHandle, ConnectionInbox, ConnectionRegistry, OutboundFrame,
    ResultAggregator, SessionControl, SubmissionCoordinator, SubmissionError, SubmitAnswer,
    SystemClock,
};
use quizcast_db::{MemoryStore, Store};
use quizcast_types::{AnswerOption, Quiz, QuizId};
use serde_json::Value;

struct Engine {
    store: Store,
    registry: Arc<ConnectionRegistry>,
    session: SessionControl,
    submission: SubmissionCoordinator,
}

async fn engine() -> Engine {
    let memory = MemoryStore::new();
    memory
        .insert_quiz(Quiz {
            id: QuizId(1),
            question_text: "Which planet is largest?".into(),
            option_a: "Mars".into(),
            option_b: "Jupiter".into(),
            option_c: "Venus".into(),
            option_d: "Earth".into(),
            correct_answer: AnswerOption::B,
            image_url: None,
            video_url: None,
        })
        .await;
    let store = Store::memory(memory);
    let clock = Arc::new(SystemClock);
    let registry = Arc::new(ConnectionRegistry::new(16, clock.clone()));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
    let aggregator = ResultAggregator::new(store.clone(), clock.clone());
    Engine {
        session: SessionControl::new(store.clone(), Arc::clone(&broadcaster), clock),
        submission: SubmissionCoordinator::new(store.clone(), aggregator, broadcaster),
        store,
        registry,
    }
}

async fn subscribe(registry: &ConnectionRegistry, quiz: i64) -> ConnectionInbox {
    let (handle, inbox) = ConnectionHandle::channel(32);
    let id = handle.id();
    registry.admit(handle).await.unwrap();
    assert!(registry.set_subscription(id, Some(QuizId(quiz))).await);
    inbox
}

fn drain(inbox: &mut ConnectionInbox) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = inbox.outbound.try_recv() {
        if let OutboundFrame::Text(text) = frame {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

fn of_type<'a>(messages: &'a [Value], kind: &str) -> Vec<&'a Value> {
    messages.iter().filter(|m| m["type"] == kind).collect()
}

#[tokio::test]
async fn resubmission_moves_the_vote_and_observers_see_both_tallies() {
    let e = engine().await;
    e.session.start(QuizId(1)).await.unwrap();
    let mut observer = subscribe(&e.registry, 1).await;
    let participant = e.store.create_participant("ada").await.unwrap();

    let first = e
        .submission
        .submit(SubmitAnswer {
            participant_id: participant.id,
            quiz_id: QuizId(1),
            selected_option: AnswerOption::B,
        })
        .await
        .unwrap();
    assert!(first.created);
    assert!(first.answer.is_correct);

    let second = e
        .submission
        .submit(SubmitAnswer {
            participant_id: participant.id,
            quiz_id: QuizId(1),
            selected_option: AnswerOption::A,
        })
        .await
        .unwrap();
    assert!(!second.created);
    assert!(!second.answer.is_correct);
    assert_eq!(second.answer.id, first.answer.id);

    let messages = drain(&mut observer);
    let updates = of_type(&messages, "result_update");
    assert_eq!(updates.len(), 2);

    let after_first = &updates[0]["data"];
    assert_eq!(after_first["total_answers"], 1);
    assert_eq!(after_first["results"]["B"]["count"], 1);
    assert_eq!(after_first["correct_count"], 1);

    let after_second = &updates[1]["data"];
    assert_eq!(after_second["total_answers"], 1);
    assert_eq!(after_second["results"]["A"]["count"], 1);
    assert_eq!(after_second["results"]["B"]["count"], 0);
    assert_eq!(after_second["correct_count"], 0);

    assert_eq!(of_type(&messages, "answer_status").len(), 2);
}

#[tokio::test]
async fn closing_voting_notifies_observers_and_refuses_late_votes() {
    let e = engine().await;
    e.session.start(QuizId(1)).await.unwrap();
    let mut observer = subscribe(&e.registry, 1).await;
    let participant = e.store.create_participant("grace").await.unwrap();

    e.session.set_accepting(false).await.unwrap();
    let messages = drain(&mut observer);
    assert_eq!(of_type(&messages, "voting_end").len(), 1);
    assert_eq!(of_type(&messages, "session_update").len(), 1);

    let err = e
        .submission
        .submit(SubmitAnswer {
            participant_id: participant.id,
            quiz_id: QuizId(1),
            selected_option: AnswerOption::B,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::AnswersNotAccepted));
    assert!(drain(&mut observer).is_empty());

    let status = e.session.status().await.unwrap();
    assert!(!status.is_accepting_answers);
    assert_eq!(status.answers_count, 0);
}
