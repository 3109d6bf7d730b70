//! Auxiliary HTTP surface: health, session history, and job submission.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::channels::LogFrontend;
use crate::context::RuntimeContext;
use crate::error::{DefinitionError, Error, HistoryError};
use crate::worker::{Job, JobMode, Worker};

/// Build the router.
pub fn routes(ctx: Arc<RuntimeContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/messages", get(session_messages))
        .route("/api/sessions/{id}/title", post(set_title))
        .route("/api/jobs", post(submit_job))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(ctx)
}

/// Serves [`routes`] as a supervised worker.
pub struct HttpWorker {
    ctx: Arc<RuntimeContext>,
    addr: SocketAddr,
}

impl HttpWorker {
    pub fn new(ctx: Arc<RuntimeContext>, addr: SocketAddr) -> Self {
        Self { ctx, addr }
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "HTTP server started");
        axum::serve(listener, routes(Arc::clone(&self.ctx))).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(ctx): State<Arc<RuntimeContext>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "assistd",
        "queued_jobs": ctx.queue.len(),
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn list_sessions(State(ctx): State<Arc<RuntimeContext>>) -> impl IntoResponse {
    Json(ctx.history.list_sessions().await)
}

async fn session_messages(
    State(ctx): State<Arc<RuntimeContext>>,
    Path(id): Path<String>,
) -> Response {
    if ctx.history.get_session(&id).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    }
    match ctx.history.get_messages(&id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Deserialize)]
struct TitleRequest {
    title: String,
}

async fn set_title(
    State(ctx): State<Arc<RuntimeContext>>,
    Path(id): Path<String>,
    Json(body): Json<TitleRequest>,
) -> Response {
    let title = body.title.trim();
    if title.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Title must not be empty");
    }
    match ctx.history.update_session_title(&id, title).await {
        Ok(session) => Json(session).into_response(),
        Err(HistoryError::SessionNotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, "Session not found")
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn delete_session(
    State(ctx): State<Arc<RuntimeContext>>,
    Path(id): Path<String>,
) -> Response {
    match ctx.history.delete_session(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ── Jobs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JobRequest {
    agent_id: String,
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    mode: JobMode,
    /// Hold the response until the agent answers.
    #[serde(default)]
    wait: bool,
}

async fn submit_job(
    State(ctx): State<Arc<RuntimeContext>>,
    Json(body): Json<JobRequest>,
) -> Response {
    if body.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Message must not be empty");
    }
    match ctx.agents.load(&body.agent_id).await {
        Ok(_) => {}
        Err(e @ DefinitionError::NotFound { .. }) => {
            return error_response(StatusCode::NOT_FOUND, e);
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }

    // The session exists before the job is queued so its id can be returned.
    let session_id = body
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if ctx.history.get_session(&session_id).await.is_none() {
        match ctx.history.create_session(&body.agent_id, &session_id).await {
            Ok(_) => {}
            Err(e @ HistoryError::InvalidSessionId { .. }) => {
                return error_response(StatusCode::BAD_REQUEST, e);
            }
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    }

    let frontend = Arc::new(LogFrontend::new(format!("http:{}", body.agent_id)));
    let job = Job::new(body.agent_id, body.message, frontend, body.mode).with_session(&session_id);

    if !body.wait {
        ctx.queue.push(job);
        return (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "queued", "session_id": session_id })),
        )
            .into_response();
    }

    let (job, rx) = job.awaiting();
    ctx.queue.push(job);
    match rx.await {
        Ok(Ok(answer)) => Json(serde_json::json!({
            "status": "done",
            "session_id": session_id,
            "answer": answer,
        }))
        .into_response(),
        Ok(Err(reason)) => error_response(StatusCode::BAD_GATEWAY, reason),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "Job was cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::defs::AgentDef;
    use crate::history::HistoryMessage;
    use crate::test_support::TestRuntime;

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn session_endpoints() {
        let rt = TestRuntime::new(vec![AgentDef::new("assistant", "p")]).await;
        rt.ctx.history.create_session("assistant", "s1").await.unwrap();
        rt.ctx
            .history
            .save_message("s1", &HistoryMessage::user("hello"))
            .await
            .unwrap();
        let app = routes(Arc::clone(&rt.ctx));

        let (status, body) = call(app.clone(), "GET", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "s1");
        assert_eq!(body[0]["title"], "hello");

        let (status, body) = call(app.clone(), "GET", "/api/sessions/s1/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["content"], "hello");

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/sessions/s1/title",
            Some(serde_json::json!({ "title": "Renamed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Renamed");

        let (status, _) = call(app.clone(), "DELETE", "/api/sessions/s1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(app, "GET", "/api/sessions/s1/messages", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_job_queues_on_a_fresh_session() {
        let rt = TestRuntime::new(vec![AgentDef::new("assistant", "p")]).await;
        let app = routes(Arc::clone(&rt.ctx));

        let (status, body) = call(
            app,
            "POST",
            "/api/jobs",
            Some(serde_json::json!({
                "agent_id": "assistant",
                "message": "summarize",
                "mode": "job"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let job = rt.ctx.queue.try_pop().unwrap();
        assert_eq!(job.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(job.mode, JobMode::Job);
        assert!(rt.ctx.history.get_session(&session_id).await.is_some());
    }

    #[tokio::test]
    async fn submit_job_rejects_unknown_agent_and_bad_session() {
        let rt = TestRuntime::new(vec![AgentDef::new("assistant", "p")]).await;
        let app = routes(Arc::clone(&rt.ctx));

        let (status, _) = call(
            app.clone(),
            "POST",
            "/api/jobs",
            Some(serde_json::json!({ "agent_id": "ghost", "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            app,
            "POST",
            "/api/jobs",
            Some(serde_json::json!({
                "agent_id": "assistant",
                "message": "hi",
                "session_id": "../etc"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(rt.ctx.queue.is_empty());
    }
}
