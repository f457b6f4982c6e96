//! REST endpoint handlers.
//!
//! Every response uses the envelope `{"success", "message"?, "data"?}`;
//! failures go through [`ApiError`] and add `error: {code, message}`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Store ping |
//! | `POST` | `/api/participants/register` | Register a nickname |
//! | `GET` | `/api/participants/{id}` | Participant with answer totals |
//! | `GET` | `/api/participants/{id}/answers` | Answer history, newest first |
//! | `POST` | `/api/answers` | Submit or overwrite a vote |
//! | `PUT` | `/api/answers/{id}` | Change an answer by id |
//! | `GET` | `/api/session/status` | Public session view |
//! | `POST` | `/api/admin/session/start` | Start a session on a quiz |
//! | `POST` | `/api/admin/session/next` | Switch to another quiz |
//! | `POST` | `/api/admin/session/toggle-answers` | Open or close voting |
//! | `POST` | `/api/admin/session/end` | End the session |
//! | `GET` | `/api/results/current` | Tally of the live quiz |
//! | `GET` | `/api/results/quiz/{id}` | Tally of any quiz |
//! | `GET` | `/api/ranking/overall` | Paged overall ranking |
//! | `GET` | `/api/ranking/quiz/{id}` | Who answered a quiz correctly |
//! | `GET` | `/api/ranking/participant/{id}` | One participant's rank |
//! | `GET` | `/api/ws/stats` | Connection counts |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use quizcast_core::SubmitAnswer;
use quizcast_types::{
    Answer, AnswerId, AnswerOption, OverallRanking, Participant, ParticipantAnswers,
    ParticipantId, ParticipantRanking, ParticipantSummary, QuizId, QuizRanking, QuizResults,
    Session, SessionView,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;
use crate::state::AppState;

/// Ranking page size when `limit` is absent or out of range.
pub const DEFAULT_RANKING_LIMIT: u32 = 100;

/// Largest accepted ranking page.
pub const MAX_RANKING_LIMIT: u32 = 1000;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always `true`; failures are rendered by [`ApiError`].
    pub success: bool,
    /// Human-readable note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    /// Payload.
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wrap `data`.
    pub const fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data,
        })
    }

    /// Wrap `data` with a message.
    pub const fn with_message(message: &'static str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data,
        })
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError>
where
    T: Validate,
{
    let Json(request) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(request)
}

fn path_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    match id {
        Ok(Path(id)) if id > 0 => Ok(id),
        Ok(Path(id)) => Err(ApiError::InvalidId(id.to_string())),
        Err(rejection) => Err(ApiError::InvalidId(rejection.body_text())),
    }
}

// ---------------------------------------------------------------------------
// Request bodies and queries
// ---------------------------------------------------------------------------

/// Body of `POST /api/participants/register`.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Display name, 1 to 50 characters after trimming.
    #[validate(length(min = 1, max = 50))]
    pub nickname: String,
}

/// Body of `POST /api/answers`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    /// Who votes.
    #[validate(range(min = 1))]
    pub participant_id: i64,
    /// Which quiz.
    #[validate(range(min = 1))]
    pub quiz_id: i64,
    /// One of `A`, `B`, `C`, `D`.
    pub selected_option: AnswerOption,
}

/// Body of `PUT /api/answers/{id}`.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAnswerRequest {
    /// The new option.
    pub selected_option: AnswerOption,
}

/// Body of the session start and next endpoints.
#[derive(Debug, Deserialize, Validate)]
pub struct QuizRequest {
    /// Quiz to show.
    #[validate(range(min = 1))]
    pub quiz_id: i64,
}

/// Body of `POST /api/admin/session/toggle-answers`.
#[derive(Debug, Deserialize, Validate)]
pub struct ToggleAnswersRequest {
    /// Whether voting should be open.
    pub is_accepting_answers: bool,
}

/// Query of `GET /api/ranking/overall`. Values are kept as text so a
/// malformed number falls back to the default instead of failing.
#[derive(Debug, Default, Deserialize)]
pub struct RankingQuery {
    /// Page size, 1 to 1000.
    pub limit: Option<String>,
    /// Rows to skip.
    pub offset: Option<String>,
}

impl RankingQuery {
    /// `(limit, offset)` with out-of-range or unparseable values replaced
    /// by the defaults.
    pub fn page(&self) -> (u32, u32) {
        let limit = self
            .limit
            .as_deref()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|n| (1..=MAX_RANKING_LIMIT).contains(n))
            .unwrap_or(DEFAULT_RANKING_LIMIT);
        let offset = self
            .offset
            .as_deref()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        (limit, offset)
    }
}

/// Body of `GET /api/ws/stats`.
#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    /// Registered connections.
    pub active_connections: usize,
    /// Configured cap.
    pub max_connections: usize,
    /// Subscriber count per observed quiz.
    pub subscribers: BTreeMap<QuizId, usize>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Ping the store.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.store.ping().await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Participants and answers
// ---------------------------------------------------------------------------

/// Register a participant.
pub async fn register_participant(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Participant>>), ApiError> {
    let Json(mut request) =
        payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    request.nickname = request.nickname.trim().to_owned();
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let participant = state.store.create_participant(&request.nickname).await?;
    tracing::info!(participant_id = %participant.id, "Participant registered");
    Ok((
        StatusCode::CREATED,
        Envelope::with_message("participant registered", participant),
    ))
}

/// A participant with answer totals.
pub async fn get_participant(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<ParticipantSummary> {
    let participant_id = ParticipantId(path_id(id)?);
    let summary = state
        .aggregator
        .participant_summary(participant_id)
        .await?
        .ok_or(ApiError::ParticipantNotFound(participant_id))?;
    Ok(Envelope::data(summary))
}

/// A participant's answer history.
pub async fn participant_answers(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<ParticipantAnswers> {
    let participant_id = ParticipantId(path_id(id)?);
    let history = state
        .aggregator
        .participant_answers(participant_id)
        .await?
        .ok_or(ApiError::ParticipantNotFound(participant_id))?;
    Ok(Envelope::data(history))
}

/// Submit a vote: 201 for a first answer, 200 when it overwrote one.
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Answer>>), ApiError> {
    let request = body(payload)?;
    let outcome = state
        .submission
        .submit(SubmitAnswer {
            participant_id: ParticipantId(request.participant_id),
            quiz_id: QuizId(request.quiz_id),
            selected_option: request.selected_option,
        })
        .await?;

    if outcome.created {
        Ok((
            StatusCode::CREATED,
            Envelope::with_message("answer submitted", outcome.answer),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Envelope::with_message("answer updated", outcome.answer),
        ))
    }
}

/// Change an existing answer by id.
pub async fn update_answer(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateAnswerRequest>, JsonRejection>,
) -> ApiResult<Answer> {
    let id = AnswerId(path_id(id)?);
    let request = body(payload)?;
    let answer = state
        .submission
        .update(id, request.selected_option)
        .await?;
    Ok(Envelope::with_message("answer updated", answer))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Public view of the current session.
pub async fn session_status(State(state): State<Arc<AppState>>) -> ApiResult<SessionView> {
    Ok(Envelope::data(state.session.status().await?))
}

/// Start a session on a quiz.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QuizRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let request = body(payload)?;
    let session = state.session.start(QuizId(request.quiz_id)).await?;
    Ok(Envelope::with_message("session started", session))
}

/// Move the session to another quiz.
pub async fn next_question(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QuizRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let request = body(payload)?;
    let session = state.session.next(QuizId(request.quiz_id)).await?;
    Ok(Envelope::with_message("question switched", session))
}

/// Open or close voting.
pub async fn toggle_answers(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ToggleAnswersRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let request = body(payload)?;
    let session = state
        .session
        .set_accepting(request.is_accepting_answers)
        .await?;
    let message = if session.is_accepting_answers {
        "answers opened"
    } else {
        "answers closed"
    };
    Ok(Envelope::with_message(message, session))
}

/// End the session.
pub async fn end_session(State(state): State<Arc<AppState>>) -> ApiResult<Session> {
    let session = state.session.end().await?;
    Ok(Envelope::with_message("session ended", session))
}

// ---------------------------------------------------------------------------
// Results and ranking
// ---------------------------------------------------------------------------

/// Tally of the live quiz, annotated with the acceptance flag.
pub async fn current_results(State(state): State<Arc<AppState>>) -> ApiResult<QuizResults> {
    let session = state
        .store
        .get_session()
        .await?
        .ok_or(ApiError::NoActiveSession)?;
    let quiz_id = session.current_quiz_id.ok_or(ApiError::NoCurrentQuiz)?;
    let results = state
        .aggregator
        .compute_with_state(quiz_id, Some(session.is_accepting_answers))
        .await?
        .ok_or(ApiError::QuizNotFound(quiz_id))?;
    Ok(Envelope::data(results))
}

/// Tally of any quiz.
pub async fn quiz_results(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<QuizResults> {
    let quiz_id = QuizId(path_id(id)?);
    let results = state
        .aggregator
        .compute(quiz_id)
        .await?
        .ok_or(ApiError::QuizNotFound(quiz_id))?;
    Ok(Envelope::data(results))
}

/// A page of the overall ranking.
pub async fn overall_ranking(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RankingQuery>,
) -> ApiResult<OverallRanking> {
    let (limit, offset) = query.page();
    Ok(Envelope::data(
        state.aggregator.overall_ranking(limit, offset).await?,
    ))
}

/// Participants who answered a quiz correctly.
pub async fn quiz_ranking(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<QuizRanking> {
    let quiz_id = QuizId(path_id(id)?);
    let ranking = state
        .aggregator
        .quiz_ranking(quiz_id)
        .await?
        .ok_or(ApiError::QuizNotFound(quiz_id))?;
    Ok(Envelope::data(ranking))
}

/// One participant's place in the overall ranking.
pub async fn participant_ranking(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<ParticipantRanking> {
    let participant_id = ParticipantId(path_id(id)?);
    let ranking = state
        .aggregator
        .participant_ranking(participant_id)
        .await?
        .ok_or(ApiError::ParticipantNotFound(participant_id))?;
    Ok(Envelope::data(ranking))
}

// ---------------------------------------------------------------------------
// WebSocket stats
// ---------------------------------------------------------------------------

/// Connection counts for monitoring.
pub async fn ws_stats(State(state): State<Arc<AppState>>) -> Json<Envelope<ConnectionStats>> {
    Envelope::data(ConnectionStats {
        active_connections: state.registry.size().await,
        max_connections: state.registry.max_connections(),
        subscribers: state.registry.subscriber_counts().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<&str>, offset: Option<&str>) -> RankingQuery {
        RankingQuery {
            limit: limit.map(str::to_owned),
            offset: offset.map(str::to_owned),
        }
    }

    #[test]
    fn ranking_page_defaults() {
        assert_eq!(RankingQuery::default().page(), (100, 0));
        assert_eq!(query(Some("25"), Some("50")).page(), (25, 50));
    }

    #[test]
    fn ranking_page_falls_back_on_bad_values() {
        assert_eq!(query(Some("0"), None).page(), (100, 0));
        assert_eq!(query(Some("1001"), None).page(), (100, 0));
        assert_eq!(query(Some("1000"), None).page(), (1000, 0));
        assert_eq!(query(Some("ten"), Some("-3")).page(), (100, 0));
    }

    #[test]
    fn nickname_length_is_validated() {
        let ok = RegisterRequest {
            nickname: String::from("ada"),
        };
        assert!(ok.validate().is_ok());
        let empty = RegisterRequest {
            nickname: String::new(),
        };
        assert!(empty.validate().is_err());
        let long = RegisterRequest {
            nickname: "x".repeat(51),
        };
        assert!(long.validate().is_err());
    }
}
