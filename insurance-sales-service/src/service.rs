use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{delete, get, post},
};
use quote_flow::{FlowEngine, FlowError, QuoteRepository, StepData, SubmitOutcome};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::chat::AnswerEngine;
use crate::models::{ChatRequest, ChatResponse, FlowRef, RetreatRequest, StartFlowRequest};

const CHAT_HISTORY_TURNS: usize = 10;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub repository: Arc<dyn QuoteRepository>,
    pub answerer: Arc<dyn AnswerEngine>,
}

/// Map engine errors onto the wire taxonomy: 404 for unknown resources,
/// 409 for conflicts, 503 for storage outages.
fn map_error(err: FlowError) -> ApiError {
    let (status, kind) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found")
    } else {
        match &err {
            FlowError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            FlowError::Storage(_) => {
                error!("storage failure: {err}");
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            _ => {
                error!("internal error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    };
    (
        status,
        Json(json!({ "error": kind, "message": err.to_string() })),
    )
}

fn validation_error(field_errors: quote_flow::FieldErrors) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": "validation_error",
            "message": "Validation failed",
            "field_errors": field_errors,
        })),
    )
}

/// Middleware attaching a correlation id to every request span and echoing
/// it back in a response header.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/flows", get(list_flows))
        .route("/flows/{flow_id}", get(get_flow_schema))
        .route("/flows/{flow_id}/start", post(start_flow))
        .route("/sessions/{session_id}", get(get_session_state))
        .route("/sessions/{session_id}/steps/{step_index}", post(submit_step))
        .route("/sessions/{session_id}/retreat", post(retreat))
        .route("/sessions/{session_id}/resume", post(resume))
        .route("/sessions/{session_id}/cancel", post(cancel))
        .route("/sessions/{session_id}/drafts/{flow_id}", get(get_draft))
        .route("/sessions/{session_id}/drafts/{flow_id}", delete(delete_draft))
        .route("/chat", post(chat))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn list_flows(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "flows": state.engine.list_flows() }))
}

async fn get_flow_schema(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> ApiResult<Value> {
    let flow = state.engine.get_schema(&flow_id).map_err(map_error)?;
    Ok(Json(serde_json::to_value(&*flow).map_err(|e| {
        map_error(FlowError::Other(e.into()))
    })?))
}

async fn start_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(request): Json<StartFlowRequest>,
) -> ApiResult<Value> {
    info!(%flow_id, user_id = %request.user_id, "starting flow");
    let started = state
        .engine
        .start_flow(
            &flow_id,
            &request.user_id,
            request.session_id,
            request.initial_data,
        )
        .await
        .map_err(map_error)?;
    Ok(Json(json!({
        "session_id": started.session_id,
        "step": started.view.step,
        "view": started.view,
    })))
}

async fn submit_step(
    State(state): State<AppState>,
    Path((session_id, step_index)): Path<(String, usize)>,
    Json(form_data): Json<StepData>,
) -> ApiResult<Value> {
    let outcome = state
        .engine
        .submit_step(&session_id, step_index, form_data)
        .await
        .map_err(map_error)?;
    match outcome {
        SubmitOutcome::Next(view) => Ok(Json(json!({ "outcome": "next", "view": view }))),
        SubmitOutcome::Rejected { field_errors } => {
            warn!(%session_id, step_index, "submission rejected");
            Err(validation_error(field_errors))
        }
        SubmitOutcome::Complete(completion) => Ok(Json(json!({
            "outcome": "complete",
            "quote_id": completion.quote_id,
            "next_flow": completion.next_flow,
        }))),
    }
}

async fn retreat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RetreatRequest>,
) -> ApiResult<Value> {
    let view = state
        .engine
        .retreat(&session_id, request.target_step)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({ "view": view })))
}

async fn resume(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<FlowRef>,
) -> ApiResult<Value> {
    let view = state
        .engine
        .resume(&session_id, &request.flow_id)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({ "view": view })))
}

async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<FlowRef>,
) -> ApiResult<Value> {
    state
        .engine
        .cancel(&session_id, &request.flow_id)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({ "status": "cancelled" })))
}

async fn get_session_state(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<quote_flow::SessionState> {
    state
        .engine
        .get_session_state(&session_id)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn get_draft(
    State(state): State<AppState>,
    Path((session_id, flow_id)): Path<(String, String)>,
) -> ApiResult<quote_flow::FormDraft> {
    state
        .engine
        .get_draft(&session_id, &flow_id)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn delete_draft(
    State(state): State<AppState>,
    Path((session_id, flow_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    state
        .engine
        .delete_draft(&session_id, &flow_id)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// Conversational mode. A session that is mid-flow gets its pending step
/// back instead of free text.
async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> ApiResult<ChatResponse> {
    let user_id = request.user_id.unwrap_or_else(|| "anonymous".to_string());
    let session = state
        .engine
        .get_or_create_session(request.session_id, &user_id)
        .await
        .map_err(map_error)?;

    let mode = session.mode();
    if let Some(view) = state
        .engine
        .current_view(&session)
        .await
        .map_err(map_error)?
    {
        return Ok(Json(ChatResponse {
            session_id: session.session_id,
            mode,
            reply: None,
            current_step: Some(view),
        }));
    }

    let history = state
        .repository
        .recent_messages(&session.session_id, CHAT_HISTORY_TURNS)
        .await
        .map_err(map_error)?;
    state
        .repository
        .append_message(&session.session_id, "user", &request.content)
        .await
        .map_err(map_error)?;

    let reply = state
        .answerer
        .answer(&request.content, &history)
        .await
        .map_err(|e| map_error(FlowError::Other(e)))?;

    state
        .repository
        .append_message(&session.session_id, "assistant", &reply)
        .await
        .map_err(map_error)?;

    Ok(Json(ChatResponse {
        session_id: session.session_id,
        mode,
        reply: Some(reply),
        current_step: None,
    }))
}
