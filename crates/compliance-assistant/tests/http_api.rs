use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use compliance_assistant::build_router;
use compliance_assistant::database::{MemoryStorage, Storage};
use compliance_assistant::logging::ActivityLogger;
use compliance_assistant::services::{
    BackgroundQueue, CompletionOptions, LanguageModel, ModelError, Orchestrator,
    OrchestratorConfig,
};
use compliance_assistant::state::AppState;

struct FixedModel;

#[async_trait]
impl LanguageModel for FixedModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(vec![text.len() as f32, 1.0, 0.5])
    }

    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String, ModelError> {
        Ok("Websites of online shops are covered from June 2025 onwards.".to_string())
    }

    async fn complete_structured(&self, _prompt: &str, _schema: &Value) -> Result<Value, ModelError> {
        Err(ModelError::Parse("structured output disabled".to_string()))
    }
}

fn app() -> Router {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let (queue, _receiver) = BackgroundQueue::bounded(16);
    let orchestrator = Orchestrator::new(
        storage,
        Arc::new(FixedModel),
        queue,
        ActivityLogger::disabled(),
        OrchestratorConfig::default(),
    );
    build_router(AppState {
        orchestrator: Arc::new(orchestrator),
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = app();

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");

    let response = app
        .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_chat_returns_answer_and_session() {
    let response = app()
        .oneshot(post_json(
            "/api/chat",
            json!({"question": "Is our web shop covered", "user_id": "u1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["answer"].as_str().is_some_and(|a| a.contains("June 2025")));
    assert!(body["session_id"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(body["suggestions"].is_array());
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let response = app()
        .oneshot(post_json("/api/chat", json!({"question": ""})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_ends_with_done_event() {
    let response = app()
        .oneshot(post_json(
            "/api/chat/stream",
            json!({"question": "Is our web shop covered", "user_id": "u1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = body_text(response).await;
    let chunk = body.find("event: chunk").unwrap();
    let metadata = body.find("event: metadata").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(chunk < metadata && metadata < done);
}

#[tokio::test]
async fn test_sessions_are_scoped_to_their_owner() {
    let app = app();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/chat",
            json!({"question": "Is our web shop covered", "user_id": "u1"}),
        ))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/sessions/{}?user_id=intruder", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/sessions/{}/messages?user_id=u1", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let messages: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(messages.as_array().map(Vec::len), Some(2));

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/sessions/{}?user_id=u1", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(Request::get("/api/users/u1/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let sessions: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(sessions.as_array().map(Vec::len), Some(0));
}
