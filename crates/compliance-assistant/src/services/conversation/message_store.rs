use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{Message, Role, SearchHit, SearchScope, Storage};
use crate::services::background::{BackgroundJob, BackgroundQueue};
use crate::services::language_model::LanguageModel;
use crate::services::notifier::{EscalationNotice, EscalationReason};
use crate::utils::similarity::rank_by_similarity;
use crate::utils::{CoreError, CoreResult};

/// Owns the append-only message log and similarity lookup over it.
#[derive(Clone)]
pub struct MessageStore {
    storage: Arc<dyn Storage>,
    model: Arc<dyn LanguageModel>,
    queue: BackgroundQueue,
    escalation_threshold: i64,
}

impl MessageStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        model: Arc<dyn LanguageModel>,
        queue: BackgroundQueue,
        escalation_threshold: usize,
    ) -> Self {
        Self {
            storage,
            model,
            queue,
            escalation_threshold: escalation_threshold as i64,
        }
    }

    /// Embedding failures leave the vector empty; the write still succeeds.
    async fn embed_or_none(&self, content: &str) -> Option<Vec<f32>> {
        match self.model.embed(content).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("Storing message without embedding: {}", e);
                None
            }
        }
    }

    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
    ) -> CoreResult<Uuid> {
        let embedding = self.embed_or_none(content).await;
        let message = Message {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            embedding,
            metadata,
        };
        self.storage.insert_message(&message).await?;
        debug!("Appended {} message {} to {}", role.as_str(), message.id, session_id);
        Ok(message.id)
    }

    /// Persist one exchange atomically: user message first, assistant second.
    pub async fn append_pair(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        metadata: Value,
    ) -> CoreResult<[Uuid; 2]> {
        let (user_embedding, assistant_embedding) = tokio::join!(
            self.embed_or_none(user_text),
            self.embed_or_none(assistant_text)
        );

        let user_message = Message {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role: Role::User,
            content: user_text.to_string(),
            created_at: Utc::now(),
            embedding: user_embedding,
            metadata: metadata.clone(),
        };

        let assistant_message = Message {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role: Role::Assistant,
            content: assistant_text.to_string(),
            created_at: Utc::now().max(user_message.created_at),
            embedding: assistant_embedding,
            metadata,
        };
        self.storage
            .insert_message_pair(&user_message, &assistant_message)
            .await?;

        self.count_and_maybe_escalate(session_id).await;

        Ok([user_message.id, assistant_message.id])
    }

    async fn count_and_maybe_escalate(&self, session_id: &str) {
        let count = match self.storage.increment_message_count(session_id, 2).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to update message count for {}: {}", session_id, e);
                return;
            }
        };

        let previous = count - 2;
        if previous >= self.escalation_threshold || count < self.escalation_threshold {
            return;
        }

        info!(
            "Session {} reached {} messages, requesting human follow-up",
            session_id, count
        );
        let user_id = match self.storage.get_session(session_id).await {
            Ok(Some(session)) => session.user_id,
            _ => "unknown".to_string(),
        };
        self.queue
            .submit(BackgroundJob::NotifyEscalation(EscalationNotice {
                user_id,
                session_id: session_id.to_string(),
                reason: EscalationReason::MessageCount { count },
                summary: None,
            }));
    }

    /// Chronological.
    pub async fn list_for_session(&self, session_id: &str) -> CoreResult<Vec<Message>> {
        self.storage.list_messages(session_id, None).await
    }

    /// Last `n` messages, chronological.
    pub async fn recent(&self, session_id: &str, n: usize) -> CoreResult<Vec<Message>> {
        self.storage.list_messages(session_id, Some(n)).await
    }

    /// Messages of a session the caller must own.
    pub async fn list_for_user_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> CoreResult<Vec<Message>> {
        match self.storage.get_session(session_id).await? {
            Some(session) if session.user_id == user_id => self.list_for_session(session_id).await,
            _ => Err(CoreError::NotFound(format!("session {}", session_id))),
        }
    }

    pub async fn recent_for_user(&self, user_id: &str, n: usize) -> CoreResult<Vec<Message>> {
        self.storage.recent_messages_for_user(user_id, n).await
    }

    /// Past messages of `user_id` (any session) ranked by cosine similarity, best first.
    pub async fn find_similar(
        &self,
        query_vector: &[f32],
        user_id: &str,
        limit: usize,
        min_similarity: f32,
    ) -> CoreResult<Vec<(Message, f32)>> {
        let hits = self
            .storage
            .search(
                query_vector,
                &SearchScope::UserMessages {
                    user_id: user_id.to_string(),
                },
                limit,
                min_similarity,
            )
            .await?;

        let scored = hits
            .into_iter()
            .filter_map(|hit| match hit {
                SearchHit::Message {
                    message,
                    similarity,
                } => Some((message, similarity)),
                SearchHit::Reference(_) => None,
            })
            .collect();

        Ok(rank_by_similarity(scored, min_similarity, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryStorage, Session};
    use crate::services::language_model::{MockLanguageModel, ModelError};
    use serde_json::json;

    async fn setup(
        model: MockLanguageModel,
        threshold: usize,
    ) -> (MessageStore, Arc<MemoryStorage>, flume::Receiver<BackgroundJob>) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_session(&Session::new("s1".into(), "u1", json!({})))
            .await
            .unwrap();
        let (queue, receiver) = BackgroundQueue::bounded(8);
        let store = MessageStore::new(storage.clone(), Arc::new(model), queue, threshold);
        (store, storage, receiver)
    }

    fn embedding_model() -> MockLanguageModel {
        let mut model = MockLanguageModel::new();
        model.expect_embed().returning(|text| {
            if text.contains("ticket") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        });
        model
    }

    #[tokio::test]
    async fn test_append_pair_orders_roles() {
        let (store, _, _) = setup(embedding_model(), 20).await;
        store.append_pair("s1", "Q", "A", json!({})).await.unwrap();

        let messages = store.list_for_session("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].created_at >= messages[0].created_at);
    }

    #[tokio::test]
    async fn test_embedding_failure_still_stores_message() {
        let mut model = MockLanguageModel::new();
        model
            .expect_embed()
            .returning(|_| Err(ModelError::Transport("connection refused".into())));
        let (store, _, _) = setup(model, 20).await;

        store
            .append("s1", Role::User, "hello", json!({}))
            .await
            .unwrap();
        let messages = store.list_for_session("s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_threshold_crossing_submits_one_notice() {
        let (store, _, receiver) = setup(embedding_model(), 4).await;
        for _ in 0..3 {
            store.append_pair("s1", "Q", "A", json!({})).await.unwrap();
        }

        let jobs: Vec<_> = receiver.drain().collect();
        assert_eq!(jobs.len(), 1);
        match &jobs[0] {
            BackgroundJob::NotifyEscalation(notice) => {
                assert_eq!(notice.user_id, "u1");
                assert_eq!(notice.reason, EscalationReason::MessageCount { count: 4 });
            }
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_find_similar_is_filtered_and_sorted() {
        let (store, _, _) = setup(embedding_model(), 20).await;
        store
            .append("s1", Role::User, "ticket machines", json!({}))
            .await
            .unwrap();
        store
            .append("s1", Role::User, "payment terminals", json!({}))
            .await
            .unwrap();

        let similar = store.find_similar(&[0.9, 0.1], "u1", 5, 0.75).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.content, "ticket machines");
        assert!(similar.iter().all(|(_, sim)| *sim >= 0.75));
        assert!(similar.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let (store, _, _) = setup(embedding_model(), 20).await;
        let err = store.list_for_user_session("s1", "u2").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
