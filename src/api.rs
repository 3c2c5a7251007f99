//! REST API Server for the research orchestrator
//!
//! Exposes task submission (streaming and synchronous), run lookup,
//! the specialist roster and conversation persistence over HTTP.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::events::{CancelSignal, EventEmitter, RunEvent};
use crate::memory::{ConversationStore, NewMessage};
use crate::models::{ConversationTurn, FileContext, Role, RunOutcome, Task, TaskConfig};
use crate::presets;

/// Stored messages replayed as history when a request brings none.
const HISTORY_FROM_STORE: usize = 10;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default = "default_true")]
    pub generate_report: bool,
    /// Already-extracted file contents.
    #[serde(default)]
    pub files: Vec<FileContext>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ConversationCreate {
    #[serde(default)]
    pub title: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Failure that still carries a payload (e.g. partial steps).
    pub fn failure<T: Serialize>(message: String, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::error(message)
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn error_response(err: OrchestrationError) -> ApiResult {
    let status = match &err {
        OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::InvalidTask(_) | OrchestrationError::FileError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(err.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: Arc<dyn ConversationStore>,
    pub providers: Vec<(&'static str, bool)>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, conversations: Arc<dyn ConversationStore>) -> Self {
        Self {
            orchestrator,
            conversations,
            providers: Vec::new(),
        }
    }

    pub fn with_providers(mut self, providers: Vec<(&'static str, bool)>) -> Self {
        self.providers = providers;
        self
    }
}

/// =============================
/// Helpers — Owner Identity
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v.trim()).unwrap_or_else(|_| stable_uuid_from_string(v.trim()))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

fn owner_id(headers: &HeaderMap) -> Uuid {
    let header = headers.get("x-user-id").and_then(|v| v.to_str().ok());
    parse_or_stable_uuid(header, "anonymous-user")
}

/// =============================
/// Health & Roster
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let providers: BTreeMap<&str, bool> = state.providers.iter().copied().collect();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "providers": providers,
    }))
}

async fn list_agents(State(state): State<ApiState>) -> ApiResult {
    (
        StatusCode::OK,
        Json(ApiResponse::success(state.orchestrator.roster())),
    )
}

async fn list_examples() -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(presets::summaries())))
}

/// =============================
/// Task Submission
/// =============================

/// Validate the request, attach history and record the user turn.
async fn prepare_task(state: &ApiState, owner: Uuid, req: &TaskRequest) -> crate::Result<Arc<Task>> {
    let config = TaskConfig {
        max_iterations: req
            .max_iterations
            .unwrap_or(state.orchestrator.policy().default_max_iterations),
        generate_report: req.generate_report,
    };
    let mut history = req.conversation_history.clone();

    if let Some(conversation_id) = req.conversation_id {
        let stored = state.conversations.list_messages(owner, conversation_id).await?;
        if history.is_empty() {
            let skip = stored.len().saturating_sub(HISTORY_FROM_STORE);
            history = stored.iter().skip(skip).map(|m| m.as_turn()).collect();
        }
    }

    let task = Task::new(req.task.clone(), config)?
        .with_files(req.files.clone())
        .with_history(history);

    if let Some(conversation_id) = req.conversation_id {
        let attachments: Vec<&str> = req.files.iter().map(|f| f.name.as_str()).collect();
        let message = NewMessage::new(Role::User, req.task.clone())
            .with_metadata(serde_json::json!({ "attachments": attachments }));
        state
            .conversations
            .append_message(owner, conversation_id, message)
            .await?;
    }

    Ok(Arc::new(task))
}

/// Append the assistant answer of a finished run to its conversation.
async fn persist_answer(
    conversations: &dyn ConversationStore,
    owner: Uuid,
    conversation_id: Option<Uuid>,
    outcome: &RunOutcome,
) {
    let (Some(conversation_id), Some(output)) = (conversation_id, outcome.final_output.as_ref()) else {
        return;
    };

    let message = NewMessage::new(Role::Assistant, output.clone()).with_metadata(serde_json::json!({
        "run_id": outcome.run_id,
        "agent_steps": outcome.agent_steps(),
        "agent_outputs": crate::models::agent_outputs(&outcome.steps),
        "iterations": outcome.iterations,
        "termination_reason": outcome.termination_reason,
        "report_html": outcome.report_html,
    }));

    if let Err(e) = conversations.append_message(owner, conversation_id, message).await {
        warn!(run_id = %outcome.run_id, conversation_id = %conversation_id, error = %e, "Failed to persist answer");
    }
}

/// Synchronous mode: drains the run server-side and returns the terminal payload.
async fn submit_task(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> ApiResult {
    let owner = owner_id(&headers);
    info!(owner = %owner, "Received task request");

    let task = match prepare_task(&state, owner, &req).await {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };

    let run = state
        .orchestrator
        .run_to_completion(task, Some(owner), CancelSignal::new())
        .await;

    persist_answer(state.conversations.as_ref(), owner, req.conversation_id, &run.outcome).await;

    match run.terminal_event() {
        Some(event @ RunEvent::Done { .. }) => (StatusCode::OK, Json(ApiResponse::success(event))),
        Some(event @ RunEvent::Error { message, .. }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(message.clone(), event)),
        ),
        Some(event @ RunEvent::Cancelled { reason, .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure(format!("Run cancelled: {}", reason), event)),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("Run ended without a terminal event".into())),
        ),
    }
}

/// Streaming mode: one SSE record per event. Dropping the connection
/// closes the channel, which cancels the run.
async fn submit_task_stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Response {
    let owner = owner_id(&headers);
    info!(owner = %owner, "Received streaming task request");

    let task = match prepare_task(&state, owner, &req).await {
        Ok(task) => task,
        Err(e) => return error_response(e).into_response(),
    };

    let cancel = CancelSignal::new();
    let policy = state.orchestrator.policy().clone();
    let (emitter, rx) = EventEmitter::channel(policy.event_buffer, cancel.clone());
    let mut emitter = emitter.with_tool_calls(policy.stream_tool_calls);

    let conversation_id = req.conversation_id;
    tokio::spawn(async move {
        let outcome = state
            .orchestrator
            .run(task, Some(owner), &mut emitter, &cancel)
            .await;
        drop(emitter);
        persist_answer(state.conversations.as_ref(), owner, conversation_id, &outcome).await;
    });

    sse_response(rx).into_response()
}

fn sse_response(
    rx: tokio::sync::mpsc::Receiver<RunEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(json))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Run ids submitted by the caller, oldest first.
async fn list_runs(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    match state.orchestrator.audit_log().list_for_owner(owner_id(&headers)).await {
        Ok(run_ids) => (StatusCode::OK, Json(ApiResponse::success(run_ids))),
        Err(e) => error_response(e),
    }
}

/// Run lookup from the audit log. Runs owned by someone else read as missing.
async fn get_run(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> ApiResult {
    let owner = owner_id(&headers);
    let audit = state.orchestrator.audit_log();

    let record = match audit.get(run_id).await {
        Ok(Some(record)) if record.owner_id.map_or(true, |o| o == owner) => record,
        Ok(_) => {
            return error_response(OrchestrationError::NotFound(format!("run {}", run_id)));
        }
        Err(e) => return error_response(e),
    };

    let integrity_verified = audit.verify_integrity(run_id).await.unwrap_or(false);
    let status = record
        .events
        .iter()
        .rev()
        .find(|e| e.is_terminal())
        .map(RunEvent::kind)
        .unwrap_or("unknown");

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "run_id": record.run_id,
            "status": status,
            "task": record.task.text,
            "termination_reason": record.outcome.termination_reason,
            "output": record.outcome.final_output,
            "message": record.outcome.message,
            "iterations": record.outcome.iterations,
            "agent_steps": record.outcome.agent_steps(),
            "execution_time_ms": record.outcome.execution_time_ms,
            "created_at": record.created_at.to_rfc3339(),
            "integrity_verified": integrity_verified,
        }))),
    )
}

/// =============================
/// Conversations
/// =============================

async fn list_conversations(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    match state.conversations.list_conversations(owner_id(&headers)).await {
        Ok(items) => (StatusCode::OK, Json(ApiResponse::success(items))),
        Err(e) => error_response(e),
    }
}

async fn create_conversation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ConversationCreate>,
) -> ApiResult {
    match state
        .conversations
        .create_conversation(owner_id(&headers), body.title.as_deref())
        .await
    {
        Ok(convo) => (StatusCode::CREATED, Json(ApiResponse::success(convo))),
        Err(e) => error_response(e),
    }
}

async fn list_messages(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult {
    match state
        .conversations
        .list_messages(owner_id(&headers), conversation_id)
        .await
    {
        Ok(messages) => (StatusCode::OK, Json(ApiResponse::success(messages))),
        Err(e) => error_response(e),
    }
}

async fn add_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<NewMessage>,
) -> ApiResult {
    if body.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message content must not be empty".into())),
        );
    }

    match state
        .conversations
        .append_message(owner_id(&headers), conversation_id, body)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(ApiResponse::success(message))),
        Err(e) => error_response(e),
    }
}

async fn delete_conversation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult {
    match state
        .conversations
        .delete_conversation(owner_id(&headers), conversation_id)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "status": "deleted" }))),
        ),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agents", get(list_agents))
        .route("/api/examples", get(list_examples))
        .route("/api/task", get(list_runs).post(submit_task))
        .route("/api/task/stream", post(submit_task_stream))
        .route("/api/task/:run_id", get(get_run))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/:conversation_id",
            axum::routing::delete(delete_conversation),
        )
        .route(
            "/api/conversations/:conversation_id/messages",
            get(list_messages).post(add_message),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::OrchestrationPolicy;
    use crate::memory::InMemoryConversationStore;
    use crate::testing::{stub_registry, stub_roster, ScriptedReasoner};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";

    fn app() -> Router {
        let orchestrator = Orchestrator::new(
            stub_roster(&["research_intelligence", "quant_researcher", "portfolio_analyst"]),
            Arc::new(ScriptedReasoner::answering("Buy the dip.")),
            stub_registry(),
            Arc::new(AuditLog::new()),
            OrchestrationPolicy::default(),
        );
        let state = ApiState::new(Arc::new(orchestrator), Arc::new(InMemoryConversationStore::new()))
            .with_providers(vec![("groq", true), ("together", false)]);
        create_router(state)
    }

    fn json_request(method: &str, uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", user)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_stable_owner_ids() {
        let a = parse_or_stable_uuid(Some(ALICE), "anonymous-user");
        assert_eq!(a, parse_or_stable_uuid(Some(ALICE), "anonymous-user"));
        assert_ne!(a, parse_or_stable_uuid(Some(BOB), "anonymous-user"));
        assert_eq!(a.get_version_num(), 4);

        let explicit = Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(Some(&explicit.to_string()), "x"), explicit);
        assert_eq!(
            parse_or_stable_uuid(Some("  "), "anonymous-user"),
            parse_or_stable_uuid(None, "anonymous-user")
        );
    }

    #[tokio::test]
    async fn test_health_lists_providers() {
        let response = app().oneshot(get_request("/health", ALICE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["providers"]["groq"], true);
        assert_eq!(body["providers"]["together"], false);
    }

    #[tokio::test]
    async fn test_agents_lists_roster() {
        let response = app().oneshot(get_request("/api/agents", ALICE)).await.unwrap();
        let body = body_json(response).await;
        let agents = body["data"].as_array().unwrap();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0]["id"], "research_intelligence");
        assert!(agents[0].get("system_prompt").is_none());
    }

    #[tokio::test]
    async fn test_examples_lists_presets() {
        let response = app().oneshot(get_request("/api/examples", ALICE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let examples = body["data"].as_array().unwrap();
        assert_eq!(examples.len(), presets::PRESET_TASKS.len());
        assert_eq!(examples[0]["name"], "market_analysis");
        assert!(examples[0]["description"].as_str().unwrap().ends_with("..."));
        assert!(examples[0]["task"].as_str().unwrap().contains("AAPL"));
    }

    #[tokio::test]
    async fn test_sync_task_returns_done_payload() {
        let response = app()
            .oneshot(json_request("POST", "/api/task", ALICE, serde_json::json!({ "task": "Analyse AAPL" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["type"], "done");
        assert_eq!(body["data"]["output"], "Buy the dip.");
        assert_eq!(body["data"]["termination_reason"], "synthesized");
        assert_eq!(body["data"]["agent_steps"].as_array().unwrap().len(), 3);
        assert!(body["data"]["report_html"].as_str().unwrap().contains("<html"));
    }

    #[tokio::test]
    async fn test_invalid_task_is_bad_request() {
        let response = app()
            .oneshot(json_request("POST", "/api/task", ALICE, serde_json::json!({ "task": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app()
            .oneshot(json_request(
                "POST",
                "/api/task",
                ALICE,
                serde_json::json!({ "task": "Analyse AAPL", "max_iterations": 0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_lookup_is_owner_scoped() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/task", ALICE, serde_json::json!({ "task": "Analyse AAPL" })))
            .await
            .unwrap();
        let run_id = body_json(response).await["data"]["run_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/task/{}", run_id), ALICE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], "done");
        assert_eq!(body["data"]["integrity_verified"], true);

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/task/{}", run_id), BOB))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(get_request("/api/task", ALICE)).await.unwrap();
        assert_eq!(body_json(response).await["data"][0], run_id.as_str());
        let response = app.clone().oneshot(get_request("/api/task", BOB)).await.unwrap();
        assert!(body_json(response).await["data"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(get_request(&format!("/api/task/{}", Uuid::new_v4()), ALICE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_emits_sse_records_until_terminal() {
        let response = app()
            .oneshot(json_request("POST", "/api/task/stream", ALICE, serde_json::json!({ "task": "Analyse AAPL" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let kinds: Vec<String> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str::<serde_json::Value>(data).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["start", "step", "step", "step", "done"]);
    }

    #[tokio::test]
    async fn test_conversation_crud_and_ownership() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/conversations", ALICE, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let convo = body_json(response).await["data"].clone();
        assert_eq!(convo["title"], "New Conversation");
        let id = convo["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/conversations/{}/messages", id),
                ALICE,
                serde_json::json!({ "role": "user", "content": "hello" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/conversations/{}/messages", id), BOB))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(get_request("/api/conversations", ALICE)).await.unwrap();
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/api/conversations/{}", id))
            .header("x-user-id", ALICE)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request(&format!("/api/conversations/{}/messages", id), ALICE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_task_in_conversation_persists_both_turns() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/conversations", ALICE, serde_json::json!({ "title": "AAPL" })))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/task",
                ALICE,
                serde_json::json!({
                    "task": "Analyse AAPL",
                    "conversation_id": id,
                    "files": [{ "name": "prices.csv", "content": "AAPL,190" }],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request(&format!("/api/conversations/{}/messages", id), ALICE))
            .await
            .unwrap();
        let messages = body_json(response).await["data"].as_array().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["metadata"]["attachments"][0], "prices.csv");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Buy the dip.");
        assert_eq!(messages[1]["metadata"]["iterations"], 3);
    }

    #[tokio::test]
    async fn test_task_in_foreign_conversation_is_not_found() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/conversations", ALICE, serde_json::json!({})))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/task",
                BOB,
                serde_json::json!({ "task": "Analyse AAPL", "conversation_id": id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
