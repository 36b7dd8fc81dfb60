use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::database::{Message, Session, UserFact};
use crate::logging::{ActivityLog, ActivityType};
use crate::models::UserQuery;
use crate::services::conversation::ConversationSummary;
use crate::services::Orchestrator;
use crate::utils::error::ApiError;

/// `GET /api/users/{user_id}/sessions`
pub async fn list_sessions_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = orchestrator.sessions().list_for_user(&user_id).await?;
    Ok(Json(sessions))
}

/// `GET /api/sessions/{session_id}/messages?user_id=`
pub async fn list_messages_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = orchestrator
        .messages()
        .list_for_user_session(&session_id, &query.user_id)
        .await?;
    Ok(Json(messages))
}

/// `GET /api/sessions/{session_id}/summary?user_id=`; `null` while the session is too short.
pub async fn summary_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Option<ConversationSummary>>, ApiError> {
    orchestrator
        .sessions()
        .get_owned(&session_id, &query.user_id)
        .await?;
    let summary = orchestrator.summarizer().summarize(&session_id).await?;
    Ok(Json(summary))
}

/// `DELETE /api/sessions/{session_id}?user_id=`; removes the session and its messages.
pub async fn delete_session_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<StatusCode, ApiError> {
    orchestrator
        .sessions()
        .get_owned(&session_id, &query.user_id)
        .await?;
    orchestrator.sessions().delete(&session_id).await?;

    info!("Deleted session {} for {}", session_id, query.user_id);
    orchestrator.logger().log(
        ActivityLog::builder(&session_id, &query.user_id, ActivityType::SessionDeleted).build(),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/users/{user_id}/facts`
pub async fn list_facts_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<UserFact>>, ApiError> {
    let facts = orchestrator.facts().list_for_user(&user_id).await?;
    Ok(Json(facts))
}
