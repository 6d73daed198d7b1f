//! HTTP surface of the library module, mounted under `/api/library`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use shelf_http::error::AppError;
use utoipa::{OpenApi, ToSchema};

use super::session::{ConversationState, DialogueState, ListingCursor};
use super::turn::{Intent, TurnHandler, TurnRequest, TurnResponse};

/// Counters for one user's library.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserStats {
    pub user_id: String,
    pub books: usize,
    pub active_loans: usize,
    pub returned_loans: usize,
    pub total_loans: u64,
    pub total_returns: u64,
    pub seen_before: bool,
}

#[derive(OpenApi)]
#[openapi(
    paths(take_turn, health_check, user_stats),
    components(schemas(
        TurnRequest,
        TurnResponse,
        Intent,
        ConversationState,
        DialogueState,
        ListingCursor,
        UserStats
    )),
    tags((name = "Library", description = "Conversational personal library"))
)]
struct LibraryApi;

pub fn router(handler: TurnHandler) -> Router {
    Router::new()
        .route("/turn", post(take_turn))
        .route("/health", get(health_check))
        .route("/users/{user_id}/stats", get(user_stats))
        .with_state(handler)
}

/// OpenAPI fragment with module-relative paths.
pub fn openapi() -> Option<serde_json::Value> {
    match serde_json::to_value(LibraryApi::openapi()) {
        Ok(spec) => Some(spec),
        Err(err) => {
            tracing::warn!(error = %err, "library OpenAPI fragment could not be serialized");
            None
        }
    }
}

/// Run one conversational turn
#[utoipa::path(
    post,
    path = "/turn",
    tag = "Library",
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Reply and updated session", body = TurnResponse),
        (status = 422, description = "Malformed request")
    )
)]
async fn take_turn(
    State(handler): State<TurnHandler>,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::validation(
            vec![json!({"field": "body", "error": rejection.body_text()})],
            "turn request body is not valid",
        )
    })?;

    if request.user_id.trim().is_empty() {
        return Err(AppError::validation(
            vec![json!({"field": "user_id", "error": "required"})],
            "user_id must not be empty",
        ));
    }

    Ok(Json(handler.handle_guarded(request).await))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Library",
    responses((status = 200, description = "OK", body = String))
)]
async fn health_check() -> &'static str {
    "library module is healthy"
}

/// Library counters for a user
#[utoipa::path(
    get,
    path = "/users/{user_id}/stats",
    tag = "Library",
    params(("user_id" = String, Path, description = "Library owner")),
    responses(
        (status = 200, description = "Counters", body = UserStats),
        (status = 404, description = "No library stored for this user")
    )
)]
async fn user_stats(
    State(handler): State<TurnHandler>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, AppError> {
    let state = handler
        .manager()
        .store()
        .peek(&user_id)
        .await
        .map_err(|err| AppError::Internal(err.into()))?
        .ok_or_else(|| AppError::not_found(format!("no library stored for user '{user_id}'")))?;

    Ok(Json(UserStats {
        books: state.catalog.len(),
        active_loans: state.active_loans.len(),
        returned_loans: state.loan_history.len(),
        total_loans: state.stats.total_loans,
        total_returns: state.stats.total_returns,
        seen_before: state.seen_before,
        user_id,
    }))
}
