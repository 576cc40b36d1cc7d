// REST API with Axum
//
// Thin JSON layer over the document store and the vote engine. All routes
// live under /api. Errors come back as `{ "message": "..." }`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::db;
use crate::engine::{VoteEngine, VoteOutcome};
use crate::entities::{
    require_text, Bounty, Comment, Document, EntityKind, NewBounty, NewComment, NewProblem, NewRelationship,
    NewSolution, Problem, Solution, Votable,
};
use crate::error::TownhallError;
use crate::verification::VerificationCodes;
use crate::vote::Direction;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub engine: VoteEngine,
    pub codes: Arc<VerificationCodes>,
}

impl AppState {
    pub fn new(conn: Connection, engine: VoteEngine, codes: VerificationCodes) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            engine,
            codes: Arc::new(codes),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Serialize)]
struct MessageBody {
    message: String,
}

fn message(text: impl Into<String>) -> Json<MessageBody> {
    Json(MessageBody {
        message: text.into(),
    })
}

impl IntoResponse for TownhallError {
    fn into_response(self) -> Response {
        let status = match self {
            TownhallError::NotFound { .. } => StatusCode::NOT_FOUND,
            TownhallError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TownhallError::Forbidden(_) => StatusCode::FORBIDDEN,
            TownhallError::ConflictRetry { .. }
            | TownhallError::Storage(_)
            | TownhallError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_client_error() {
            debug!("request rejected: {}", self);
        } else {
            error!("request failed: {}", self);
        }

        (status, message(self.to_string())).into_response()
    }
}

type ApiResult<T> = Result<T, TownhallError>;

/// Malformed JSON is the caller's fault: report it as InvalidArgument
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| TownhallError::invalid(rejection.body_text()))
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl VoteRequest {
    fn parse(self) -> ApiResult<(String, Direction)> {
        let user_id = self
            .user_id
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TownhallError::invalid("userId is required"))?;

        let direction = self
            .direction
            .ok_or_else(|| TownhallError::invalid("direction is required"))?
            .parse()?;

        Ok((user_id, direction))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRequest {
    #[serde(flatten)]
    pub link: NewRelationship,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub phone_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub phone_number: String,
    pub code: String,
}

// ============================================================================
// Generic handlers (shared by every entity kind)
// ============================================================================

/// GET /api/<kind> - all documents, newest first
async fn list_all<T: Document>(State(state): State<AppState>) -> ApiResult<Json<Vec<T>>> {
    let conn = state.conn();
    Ok(Json(db::list_documents(&conn)?))
}

/// GET /api/<kind>/:id
async fn get_one<T: Document>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<T>> {
    let conn = state.conn();
    Ok(Json(db::require_document(&conn, &id)?))
}

/// PATCH /api/<kind>/:id/vote
async fn vote<T: Votable>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> ApiResult<Json<VoteOutcome<T>>> {
    let (user_id, direction) = body(payload)?.parse()?;

    let conn = state.conn();
    let outcome = state.engine.vote::<T>(&conn, &id, &user_id, direction)?;
    Ok(Json(outcome))
}

/// DELETE /api/<kind>/:id?userId=
async fn delete_one<T: Document>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<MessageBody>> {
    let requester = query.user_id.unwrap_or_default();

    let conn = state.conn();
    db::delete_document::<T>(&conn, &id, &requester)?;

    info!(kind = %T::KIND, id = %id, "document deleted");
    Ok(message(format!("{} deleted", T::KIND)))
}

fn require_parent(conn: &Connection, kind: EntityKind, id: &str) -> ApiResult<()> {
    if !db::exists(conn, kind, id)? {
        return Err(TownhallError::not_found(kind, id));
    }
    Ok(())
}

// ============================================================================
// Per-kind handlers
// ============================================================================

/// POST /api/problems
async fn create_problem(
    State(state): State<AppState>,
    payload: Result<Json<NewProblem>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let problem = Problem::create(body(payload)?)?;

    let conn = state.conn();
    db::insert_document(&conn, &problem)?;

    info!(id = %problem.id, "problem created");
    Ok((StatusCode::CREATED, Json(problem)))
}

/// POST /api/problems/:id/relationships
async fn add_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RelationshipRequest>, JsonRejection>,
) -> ApiResult<Json<Problem>> {
    let RelationshipRequest { link, user_id } = body(payload)?;

    let actor = user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| TownhallError::invalid("userId is required"))?;
    require_text(&link.problem_id, "problemId")?;

    let conn = state.conn();
    require_parent(&conn, EntityKind::Problem, &link.problem_id)?;

    let problem = state
        .engine
        .update::<Problem, _>(&conn, &id, &actor, "relationship_added", |problem| {
            problem.add_relationship(link.clone())?;
            Ok(serde_json::json!({ "type": link.kind, "problemId": link.problem_id }))
        })?;

    Ok(Json(problem))
}

/// GET /api/solutions/problem/:problemId
async fn solutions_for_problem(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
) -> ApiResult<Json<Vec<Solution>>> {
    let conn = state.conn();
    Ok(Json(db::list_by_parent(&conn, &problem_id)?))
}

/// POST /api/solutions
async fn create_solution(
    State(state): State<AppState>,
    payload: Result<Json<NewSolution>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let solution = Solution::create(body(payload)?)?;

    let conn = state.conn();
    require_parent(&conn, EntityKind::Problem, &solution.problem_id)?;
    db::insert_document(&conn, &solution)?;

    info!(id = %solution.id, problem_id = %solution.problem_id, "solution created");
    Ok((StatusCode::CREATED, Json(solution)))
}

/// GET /api/bounties/solution/:solutionId
async fn bounties_for_solution(
    State(state): State<AppState>,
    Path(solution_id): Path<String>,
) -> ApiResult<Json<Vec<Bounty>>> {
    let conn = state.conn();
    Ok(Json(db::list_by_parent(&conn, &solution_id)?))
}

/// POST /api/bounties
async fn create_bounty(
    State(state): State<AppState>,
    payload: Result<Json<NewBounty>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let bounty = Bounty::create(body(payload)?)?;

    let conn = state.conn();
    require_parent(&conn, EntityKind::Solution, &bounty.solution_id)?;
    db::insert_document(&conn, &bounty)?;

    info!(id = %bounty.id, amount = bounty.amount, "bounty created");
    Ok((StatusCode::CREATED, Json(bounty)))
}

/// GET /api/comments/problem/:problemId
async fn comments_for_problem(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
) -> ApiResult<Json<Vec<Comment>>> {
    let conn = state.conn();
    Ok(Json(db::list_by_parent(&conn, &problem_id)?))
}

/// POST /api/comments
async fn create_comment(
    State(state): State<AppState>,
    payload: Result<Json<NewComment>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let comment = Comment::create(body(payload)?)?;

    let conn = state.conn();
    require_parent(&conn, EntityKind::Problem, &comment.problem_id)?;
    db::insert_document(&conn, &comment)?;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST /api/auth/verify
async fn issue_code(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<Json<MessageBody>> {
    let request = body(payload)?;

    // An SMS gateway, when configured, takes the issued code from here.
    let _code = state.codes.issue(&request.phone_number)?;

    info!(pending = state.codes.pending_count(), "verification code issued");
    Ok(message("Verification code sent"))
}

/// POST /api/auth/confirm
async fn confirm_code(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = body(payload)?;

    if !state.codes.confirm(&request.phone_number, &request.code) {
        return Err(TownhallError::invalid("invalid or expired verification code"));
    }

    Ok(Json(serde_json::json!({ "verified": true })))
}

/// GET /api/health - Health check
async fn health_check() -> Json<MessageBody> {
    message("OK")
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/problems", get(list_all::<Problem>).post(create_problem))
        .route(
            "/problems/:id",
            get(get_one::<Problem>).delete(delete_one::<Problem>),
        )
        .route("/problems/:id/vote", patch(vote::<Problem>))
        .route("/problems/:id/relationships", post(add_relationship))
        .route("/solutions", get(list_all::<Solution>).post(create_solution))
        .route("/solutions/problem/:problem_id", get(solutions_for_problem))
        .route(
            "/solutions/:id",
            get(get_one::<Solution>).delete(delete_one::<Solution>),
        )
        .route("/solutions/:id/vote", patch(vote::<Solution>))
        .route("/bounties", get(list_all::<Bounty>).post(create_bounty))
        .route("/bounties/solution/:solution_id", get(bounties_for_solution))
        .route(
            "/bounties/:id",
            get(get_one::<Bounty>).delete(delete_one::<Bounty>),
        )
        .route("/bounties/:id/vote", patch(vote::<Bounty>))
        .route("/comments", post(create_comment))
        .route("/comments/problem/:problem_id", get(comments_for_problem))
        .route("/auth/verify", post(issue_code))
        .route("/auth/confirm", post(confirm_code))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
