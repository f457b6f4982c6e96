//! In-process store with the same semantics as the `PostgreSQL` backend.
//!
//! Used by the test suites of the downstream crates and by local demos
//! that run without a database. All state sits behind one async mutex,
//! so every operation (including the answer upsert) is atomic with
//! respect to every other.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quizcast_types::{
    Answer, AnswerId, AnswerOption, CorrectParticipant, Participant, ParticipantAnswer,
    ParticipantId, Quiz, QuizId, RankingEntry, Session, SessionId,
};
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::store::{QuizPosition, UpsertOutcome};

/// Per-participant answer totals, the basis of every ranking.
#[derive(Debug, Clone, Copy)]
struct Tally {
    participant_id: ParticipantId,
    total: u32,
    correct: u32,
    accuracy: f64,
}

impl Tally {
    /// Compare the given totals against this tally by score, then
    /// accuracy, then answers. `Greater` means the given totals rank ahead.
    fn standing(&self, correct: u32, accuracy: f64, total: u32) -> Ordering {
        correct
            .cmp(&self.correct)
            .then_with(|| accuracy.total_cmp(&self.accuracy))
            .then_with(|| total.cmp(&self.total))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    quizzes: BTreeMap<QuizId, Quiz>,
    participants: BTreeMap<ParticipantId, Participant>,
    sessions: Vec<Session>,
    answers: BTreeMap<AnswerId, Answer>,
    answer_index: HashMap<(ParticipantId, QuizId), AnswerId>,
    next_participant: i64,
    next_answer: i64,
    latency: Option<Duration>,
}

/// Store holding every table in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a quiz. Replaces any quiz with the same id.
    pub async fn insert_quiz(&self, quiz: Quiz) {
        let mut state = self.state.lock().await;
        state.quizzes.insert(quiz.id, quiz);
    }

    /// Delay every subsequent operation by `latency` (for timeout tests).
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, MemoryState> {
        let state = self.state.lock().await;
        if let Some(latency) = state.latency {
            tokio::time::sleep(latency).await;
        }
        state
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub(crate) async fn get_session(&self) -> Result<Option<Session>, DbError> {
        Ok(self.lock().await.sessions.last().cloned())
    }

    pub(crate) async fn create_session(&self, quiz_id: QuizId) -> Result<Session, DbError> {
        let mut state = self.lock().await;
        if !state.quizzes.contains_key(&quiz_id) {
            return Err(DbError::MissingReference(format!("quiz {quiz_id}")));
        }
        let now = Utc::now();
        let next_id = i64::try_from(state.sessions.len())
            .unwrap_or(i64::MAX)
            .saturating_add(1);
        let session = Session {
            id: SessionId(next_id),
            current_quiz_id: Some(quiz_id),
            is_accepting_answers: true,
            created_at: now,
            updated_at: now,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    pub(crate) async fn switch_session_quiz(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<Session>, DbError> {
        let mut state = self.lock().await;
        if !state.quizzes.contains_key(&quiz_id) {
            return Err(DbError::MissingReference(format!("quiz {quiz_id}")));
        }
        Ok(state.sessions.last_mut().map(|session| {
            session.current_quiz_id = Some(quiz_id);
            session.is_accepting_answers = true;
            session.updated_at = Utc::now();
            session.clone()
        }))
    }

    pub(crate) async fn set_accepting_answers(
        &self,
        accepting: bool,
    ) -> Result<Option<Session>, DbError> {
        let mut state = self.lock().await;
        Ok(state.sessions.last_mut().map(|session| {
            session.is_accepting_answers = accepting;
            session.updated_at = Utc::now();
            session.clone()
        }))
    }

    pub(crate) async fn end_session(&self) -> Result<Option<Session>, DbError> {
        let mut state = self.lock().await;
        Ok(state.sessions.last_mut().map(|session| {
            session.is_accepting_answers = false;
            session.current_quiz_id = None;
            session.updated_at = Utc::now();
            session.clone()
        }))
    }

    // -------------------------------------------------------------------------
    // Quizzes and participants
    // -------------------------------------------------------------------------

    pub(crate) async fn get_quiz(&self, quiz_id: QuizId) -> Result<Option<Quiz>, DbError> {
        Ok(self.lock().await.quizzes.get(&quiz_id).cloned())
    }

    pub(crate) async fn get_quiz_correct_answer(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<AnswerOption>, DbError> {
        Ok(self
            .lock()
            .await
            .quizzes
            .get(&quiz_id)
            .map(|q| q.correct_answer))
    }

    pub(crate) async fn quiz_position(
        &self,
        quiz_id: QuizId,
    ) -> Result<Option<QuizPosition>, DbError> {
        let state = self.lock().await;
        let total = u32::try_from(state.quizzes.len()).unwrap_or(u32::MAX);
        Ok(state
            .quizzes
            .keys()
            .position(|id| *id == quiz_id)
            .map(|index| QuizPosition {
                question_number: u32::try_from(index)
                    .unwrap_or(u32::MAX)
                    .saturating_add(1),
                total_questions: total,
            }))
    }

    pub(crate) async fn participant_exists(&self, id: ParticipantId) -> Result<bool, DbError> {
        Ok(self.lock().await.participants.contains_key(&id))
    }

    pub(crate) async fn get_participant(
        &self,
        id: ParticipantId,
    ) -> Result<Option<Participant>, DbError> {
        Ok(self.lock().await.participants.get(&id).cloned())
    }

    pub(crate) async fn create_participant(&self, nickname: &str) -> Result<Participant, DbError> {
        let mut state = self.lock().await;
        state.next_participant = state.next_participant.saturating_add(1);
        let participant = Participant {
            id: ParticipantId(state.next_participant),
            nickname: nickname.to_owned(),
            created_at: Utc::now(),
        };
        state
            .participants
            .insert(participant.id, participant.clone());
        Ok(participant)
    }

    pub(crate) async fn count_participants(&self) -> Result<u32, DbError> {
        Ok(u32::try_from(self.lock().await.participants.len()).unwrap_or(u32::MAX))
    }

    // -------------------------------------------------------------------------
    // Answers
    // -------------------------------------------------------------------------

    pub(crate) async fn upsert_answer(
        &self,
        participant_id: ParticipantId,
        quiz_id: QuizId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<UpsertOutcome, DbError> {
        let mut state = self.lock().await;
        if !state.participants.contains_key(&participant_id) {
            return Err(DbError::MissingReference(format!(
                "participant {participant_id}"
            )));
        }
        if !state.quizzes.contains_key(&quiz_id) {
            return Err(DbError::MissingReference(format!("quiz {quiz_id}")));
        }

        let now = Utc::now();
        let existing = state.answer_index.get(&(participant_id, quiz_id)).copied();
        if let Some(answer) = existing.and_then(|id| state.answers.get_mut(&id)) {
            answer.selected_option = selected;
            answer.is_correct = is_correct;
            answer.answered_at = now;
            return Ok(UpsertOutcome {
                answer: answer.clone(),
                created: false,
            });
        }

        state.next_answer = state.next_answer.saturating_add(1);
        let answer = Answer {
            id: AnswerId(state.next_answer),
            participant_id,
            quiz_id,
            selected_option: selected,
            is_correct,
            answered_at: now,
        };
        state.answers.insert(answer.id, answer.clone());
        state
            .answer_index
            .insert((participant_id, quiz_id), answer.id);
        Ok(UpsertOutcome {
            answer,
            created: true,
        })
    }

    pub(crate) async fn get_answer(&self, id: AnswerId) -> Result<Option<Answer>, DbError> {
        Ok(self.lock().await.answers.get(&id).cloned())
    }

    pub(crate) async fn update_answer(
        &self,
        id: AnswerId,
        selected: AnswerOption,
        is_correct: bool,
    ) -> Result<Option<Answer>, DbError> {
        let mut state = self.lock().await;
        Ok(state.answers.get_mut(&id).map(|answer| {
            answer.selected_option = selected;
            answer.is_correct = is_correct;
            answer.answered_at = Utc::now();
            answer.clone()
        }))
    }

    pub(crate) async fn participant_answers(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantAnswer>, DbError> {
        let state = self.lock().await;
        let mut history: Vec<ParticipantAnswer> = state
            .answers
            .values()
            .filter(|answer| answer.participant_id == participant_id)
            .filter_map(|answer| {
                let quiz = state.quizzes.get(&answer.quiz_id)?;
                Some(ParticipantAnswer {
                    answer_id: answer.id,
                    quiz_id: answer.quiz_id,
                    question_text: quiz.question_text.clone(),
                    selected_option: answer.selected_option,
                    correct_answer: quiz.correct_answer,
                    is_correct: answer.is_correct,
                    answered_at: answer.answered_at,
                })
            })
            .collect();
        history.sort_by(|a, b| {
            b.answered_at
                .cmp(&a.answered_at)
                .then_with(|| b.answer_id.cmp(&a.answer_id))
        });
        Ok(history)
    }

    pub(crate) async fn correct_participants(
        &self,
        quiz_id: QuizId,
    ) -> Result<Vec<CorrectParticipant>, DbError> {
        let state = self.lock().await;
        let mut correct: Vec<&Answer> = state
            .answers
            .values()
            .filter(|answer| answer.quiz_id == quiz_id && answer.is_correct)
            .collect();
        correct.sort_by(|a, b| a.answered_at.cmp(&b.answered_at).then_with(|| a.id.cmp(&b.id)));
        Ok(correct
            .into_iter()
            .map(|answer| CorrectParticipant {
                participant_id: answer.participant_id,
                nickname: state.nickname(answer.participant_id),
                selected_option: answer.selected_option,
                answered_at: answer.answered_at,
            })
            .collect())
    }

    pub(crate) async fn count_answers_by_option(
        &self,
        quiz_id: QuizId,
    ) -> Result<BTreeMap<AnswerOption, u32>, DbError> {
        let state = self.lock().await;
        let mut counts = BTreeMap::new();
        for answer in state.answers.values().filter(|a| a.quiz_id == quiz_id) {
            let entry = counts.entry(answer.selected_option).or_insert(0_u32);
            *entry = entry.saturating_add(1);
        }
        Ok(counts)
    }

    // -------------------------------------------------------------------------
    // Ranking
    // -------------------------------------------------------------------------

    pub(crate) async fn overall_ranking(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RankingEntry>, DbError> {
        let state = self.lock().await;
        let mut tallies = state.tallies();
        tallies.sort_by(|a, b| {
            a.standing(b.correct, b.accuracy, b.total)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut rank = offset;
        Ok(tallies
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|tally| {
                rank = rank.saturating_add(1);
                RankingEntry {
                    rank,
                    participant_id: tally.participant_id,
                    nickname: state.nickname(tally.participant_id),
                    total_answers: tally.total,
                    correct_answers: tally.correct,
                    accuracy_rate: tally.accuracy,
                    total_score: tally.correct,
                }
            })
            .collect())
    }

    pub(crate) async fn count_ranked_above(
        &self,
        correct: u32,
        accuracy: f64,
        total: u32,
    ) -> Result<u32, DbError> {
        let ahead = self
            .lock()
            .await
            .tallies()
            .iter()
            .filter(|tally| tally.standing(correct, accuracy, total).is_lt())
            .count();
        Ok(u32::try_from(ahead).unwrap_or(u32::MAX))
    }
}

impl MemoryState {
    fn nickname(&self, id: ParticipantId) -> String {
        self.participants
            .get(&id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default()
    }

    /// Totals for every participant, including those without answers.
    fn tallies(&self) -> Vec<Tally> {
        let mut counts: BTreeMap<ParticipantId, (u32, u32)> =
            self.participants.keys().map(|id| (*id, (0, 0))).collect();
        for answer in self.answers.values() {
            if let Some((total, correct)) = counts.get_mut(&answer.participant_id) {
                *total = total.saturating_add(1);
                if answer.is_correct {
                    *correct = correct.saturating_add(1);
                }
            }
        }
        counts
            .into_iter()
            .map(|(participant_id, (total, correct))| Tally {
                participant_id,
                total,
                correct,
                accuracy: if total == 0 {
                    0.0
                } else {
                    f64::from(correct) / f64::from(total)
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

    use super::*;

    fn quiz(id: i64, correct: AnswerOption) -> Quiz {
        Quiz {
            id: QuizId(id),
            question_text: format!("Question {id}"),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: "c".into(),
            option_d: "d".into(),
            correct_answer: correct,
            image_url: None,
            video_url: None,
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_the_same_row() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::A)).await;
        let p = store.create_participant("ann").await.unwrap();

        let first = store
            .upsert_answer(p.id, QuizId(1), AnswerOption::B, false)
            .await
            .unwrap();
        let second = store
            .upsert_answer(p.id, QuizId(1), AnswerOption::A, true)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.answer.id, second.answer.id);
        assert_eq!(second.answer.selected_option, AnswerOption::A);

        let counts = store.count_answers_by_option(QuizId(1)).await.unwrap();
        assert_eq!(counts.get(&AnswerOption::A), Some(&1));
        assert_eq!(counts.get(&AnswerOption::B), None);
    }

    #[tokio::test]
    async fn concurrent_duplicate_upserts_leave_one_row() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::C)).await;
        let pid = store.create_participant("bo").await.unwrap().id;

        let mut handles = Vec::new();
        for option in AnswerOption::ALL {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_answer(pid, QuizId(1), option, option == AnswerOption::C)
                    .await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let counts = store.count_answers_by_option(QuizId(1)).await.unwrap();
        assert_eq!(counts.values().sum::<u32>(), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_unknown_references() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::A)).await;
        let result = store
            .upsert_answer(ParticipantId(42), QuizId(1), AnswerOption::A, true)
            .await;
        assert!(matches!(result, Err(DbError::MissingReference(_))));
    }

    #[tokio::test]
    async fn latest_session_is_authoritative() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::A)).await;
        store.insert_quiz(quiz(2, AnswerOption::B)).await;

        assert!(store.get_session().await.unwrap().is_none());
        store.create_session(QuizId(1)).await.unwrap();
        let second = store.create_session(QuizId(2)).await.unwrap();

        let current = store.get_session().await.unwrap().unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.current_quiz_id, Some(QuizId(2)));

        let closed = store.set_accepting_answers(false).await.unwrap().unwrap();
        assert!(!closed.is_accepting_answers);
        let ended = store.end_session().await.unwrap().unwrap();
        assert!(ended.current_quiz_id.is_none());
    }

    #[tokio::test]
    async fn quiz_position_is_ordinal_by_id() {
        let store = MemoryStore::new();
        for id in [3, 7, 11] {
            store.insert_quiz(quiz(id, AnswerOption::A)).await;
        }
        let pos = store.quiz_position(QuizId(7)).await.unwrap().unwrap();
        assert_eq!(pos.question_number, 2);
        assert_eq!(pos.total_questions, 3);
        assert!(store.quiz_position(QuizId(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ranking_orders_by_score_then_accuracy_then_volume() {
        let store = MemoryStore::new();
        for id in 1..=3 {
            store.insert_quiz(quiz(id, AnswerOption::A)).await;
        }
        let ann = store.create_participant("ann").await.unwrap();
        let bo = store.create_participant("bo").await.unwrap();
        let cy = store.create_participant("cy").await.unwrap();

        // ann: 2/3, bo: 2/2, cy: nothing
        for (quiz_id, option) in [(1, AnswerOption::A), (2, AnswerOption::A), (3, AnswerOption::B)]
        {
            store
                .upsert_answer(ann.id, QuizId(quiz_id), option, option == AnswerOption::A)
                .await
                .unwrap();
        }
        for quiz_id in [1, 2] {
            store
                .upsert_answer(bo.id, QuizId(quiz_id), AnswerOption::A, true)
                .await
                .unwrap();
        }

        let ranking = store.overall_ranking(10, 0).await.unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].participant_id, bo.id);
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[1].participant_id, ann.id);
        assert_eq!(ranking[2].participant_id, cy.id);
        assert!(ranking[2].accuracy_rate.abs() < f64::EPSILON);

        let page = store.overall_ranking(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rank, 2);
        assert_eq!(page[0].participant_id, ann.id);
    }

    #[tokio::test]
    async fn participant_history_is_newest_first_with_quiz_details() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::A)).await;
        store.insert_quiz(quiz(2, AnswerOption::C)).await;
        let ann = store.create_participant("ann").await.unwrap();
        let bo = store.create_participant("bo").await.unwrap();

        store.upsert_answer(ann.id, QuizId(1), AnswerOption::A, true).await.unwrap();
        store.upsert_answer(ann.id, QuizId(2), AnswerOption::B, false).await.unwrap();
        store.upsert_answer(bo.id, QuizId(1), AnswerOption::D, false).await.unwrap();

        let history = store.participant_answers(ann.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].quiz_id, QuizId(2));
        assert_eq!(history[0].correct_answer, AnswerOption::C);
        assert_eq!(history[0].question_text, "Question 2");
        assert!(!history[0].is_correct);
        assert_eq!(history[1].quiz_id, QuizId(1));

        assert!(store.participant_answers(ParticipantId(99)).await.unwrap().is_empty());
        assert_eq!(store.get_participant(bo.id).await.unwrap().unwrap().nickname, "bo");
        assert!(store.get_participant(ParticipantId(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn correct_participants_are_listed_earliest_first() {
        let store = MemoryStore::new();
        store.insert_quiz(quiz(1, AnswerOption::B)).await;
        let ann = store.create_participant("ann").await.unwrap();
        let bo = store.create_participant("bo").await.unwrap();
        let cy = store.create_participant("cy").await.unwrap();

        store.upsert_answer(bo.id, QuizId(1), AnswerOption::B, true).await.unwrap();
        store.upsert_answer(cy.id, QuizId(1), AnswerOption::A, false).await.unwrap();
        store.upsert_answer(ann.id, QuizId(1), AnswerOption::B, true).await.unwrap();

        let correct = store.correct_participants(QuizId(1)).await.unwrap();
        let names: Vec<&str> = correct.iter().map(|c| c.nickname.as_str()).collect();
        assert_eq!(names, vec!["bo", "ann"]);
        assert!(correct.iter().all(|c| c.selected_option == AnswerOption::B));
    }

    #[tokio::test]
    async fn ranked_above_counts_strictly_better_totals() {
        let store = MemoryStore::new();
        for id in 1..=2 {
            store.insert_quiz(quiz(id, AnswerOption::A)).await;
        }
        let ann = store.create_participant("ann").await.unwrap();
        let bo = store.create_participant("bo").await.unwrap();
        store.create_participant("cy").await.unwrap();
        for p in [ann.id, bo.id] {
            store.upsert_answer(p, QuizId(1), AnswerOption::A, true).await.unwrap();
        }

        // ann and bo tie at 1/1; cy has nothing.
        assert_eq!(store.count_ranked_above(1, 1.0, 1).await.unwrap(), 0);
        assert_eq!(store.count_ranked_above(0, 0.0, 0).await.unwrap(), 2);
        // 1 of 2 correct loses on accuracy to a perfect 1/1.
        assert_eq!(store.count_ranked_above(1, 0.5, 2).await.unwrap(), 2);
    }
}
