use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::ResolvedSession;
use crate::database::{Session, SessionId, Storage};
use crate::utils::{CoreError, CoreResult};

const MAX_SESSION_ID_LEN: usize = 128;

/// Client-supplied ids must be short and URL-safe.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Owns session identity and activity timestamps.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create(&self, user_id: &str, metadata: Value) -> CoreResult<SessionId> {
        let session = Session::new(Uuid::new_v4().to_string(), user_id, metadata);
        self.storage.insert_session(&session).await?;
        info!("Created session {} for user {}", session.id, user_id);
        Ok(session.id)
    }

    /// Create a session under a caller-chosen id. Repeating the call is harmless;
    /// an unusable id falls back to a generated one.
    pub async fn create_with_id(
        &self,
        session_id: &str,
        user_id: &str,
        metadata: Value,
    ) -> CoreResult<SessionId> {
        Ok(self
            .create_with_id_detailed(session_id, user_id, metadata)
            .await?
            .id)
    }

    async fn create_with_id_detailed(
        &self,
        session_id: &str,
        user_id: &str,
        metadata: Value,
    ) -> CoreResult<ResolvedSession> {
        if !is_valid_session_id(session_id) {
            warn!("Rejected malformed session id, generating a new one");
            return self.fallback(user_id, metadata).await;
        }

        let session = Session::new(session_id.to_string(), user_id, metadata.clone());
        match self.storage.insert_session(&session).await {
            Ok(true) => {
                info!("Created session {} for user {}", session_id, user_id);
                Ok(ResolvedSession {
                    id: session.id,
                    created: true,
                    fell_back: false,
                })
            }
            Ok(false) => {
                debug!("Session {} already exists", session_id);
                match self.storage.get_session(session_id).await {
                    Ok(Some(existing)) if existing.user_id == user_id => Ok(ResolvedSession {
                        id: existing.id,
                        created: false,
                        fell_back: false,
                    }),
                    _ => self.fallback(user_id, metadata).await,
                }
            }
            Err(e) => {
                warn!("Failed to create session {}: {}", session_id, e);
                self.fallback(user_id, metadata).await
            }
        }
    }

    async fn fallback(&self, user_id: &str, metadata: Value) -> CoreResult<ResolvedSession> {
        let id = self.create(user_id, metadata).await?;
        Ok(ResolvedSession {
            id,
            created: true,
            fell_back: true,
        })
    }

    pub async fn exists(&self, session_id: &str) -> CoreResult<bool> {
        Ok(self.storage.get_session(session_id).await?.is_some())
    }

    pub async fn get(&self, session_id: &str) -> CoreResult<Option<Session>> {
        self.storage.get_session(session_id).await
    }

    pub async fn touch(&self, session_id: &str) -> CoreResult<()> {
        self.storage.touch_session(session_id, Utc::now()).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        self.storage.list_sessions(user_id).await
    }

    /// Deletes the session and, by cascade, its messages.
    pub async fn delete(&self, session_id: &str) -> CoreResult<()> {
        if self.storage.delete_session(session_id).await? {
            info!("Deleted session {}", session_id);
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("session {}", session_id)))
        }
    }

    /// Session owned by `user_id`, or `NotFound` (foreign sessions are indistinguishable from missing ones).
    pub async fn get_owned(&self, session_id: &str, user_id: &str) -> CoreResult<Session> {
        match self.storage.get_session(session_id).await? {
            Some(session) if session.user_id == user_id => Ok(session),
            _ => Err(CoreError::NotFound(format!("session {}", session_id))),
        }
    }

    /// Ensure a usable session for this request.
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        user_id: &str,
        metadata: Value,
    ) -> CoreResult<ResolvedSession> {
        let Some(requested) = session_id.filter(|id| !id.trim().is_empty()) else {
            let id = self.create(user_id, metadata).await?;
            return Ok(ResolvedSession {
                id,
                created: true,
                fell_back: false,
            });
        };

        match self.storage.get_session(requested).await {
            Ok(Some(session)) if session.user_id == user_id => {
                if let Err(e) = self.touch(&session.id).await {
                    warn!("Failed to touch session {}: {}", session.id, e);
                }
                Ok(ResolvedSession {
                    id: session.id,
                    created: false,
                    fell_back: false,
                })
            }
            Ok(Some(_)) => {
                warn!("Session {} belongs to another user, starting a new one", requested);
                self.fallback(user_id, metadata).await
            }
            Ok(None) => self.create_with_id_detailed(requested, user_id, metadata).await,
            Err(e) => {
                warn!("Session lookup failed for {}: {}, starting a new one", requested, e);
                self.fallback(user_id, metadata).await
            }
        }
    }
}
