use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{
    FrustrationRecord, Message, ReferenceChunk, SearchHit, SearchScope, Session, SessionId,
    UserFact,
};
use super::storage::Storage;
use crate::logging::ActivityLog;
use crate::utils::similarity::{cosine_similarity, rank_by_similarity};
use crate::utils::{CoreError, CoreResult};

/// In-process storage backed by DashMap.
/// Used by tests and by `database.backend = "memory"` deployments.
pub struct MemoryStorage {
    sessions: DashMap<SessionId, Session>,
    /// session_id -> (insertion sequence, message), in insertion order
    messages: DashMap<SessionId, Vec<(u64, Message)>>,
    /// (user_id, fact_type) -> live fact
    facts: DashMap<(String, String), UserFact>,
    frustration: RwLock<Vec<FrustrationRecord>>,
    activity_logs: RwLock<Vec<ActivityLog>>,
    references: RwLock<Vec<(ReferenceChunk, Vec<f32>)>>,
    sequence: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        info!("Initializing in-memory conversation storage");
        Self {
            sessions: DashMap::new(),
            messages: DashMap::new(),
            facts: DashMap::new(),
            frustration: RwLock::new(Vec::new()),
            activity_logs: RwLock::new(Vec::new()),
            references: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Seed a reference passage for document search.
    pub fn insert_reference_chunk(&self, chunk: ReferenceChunk, embedding: Vec<f32>) {
        self.references.write().push((chunk, embedding));
    }

    pub fn activity_log_count(&self) -> usize {
        self.activity_logs.read().len()
    }

    pub fn activity_logs(&self) -> Vec<ActivityLog> {
        self.activity_logs.read().clone()
    }

    pub fn frustration_record_count(&self) -> usize {
        self.frustration.read().len()
    }

    fn user_session_ids(&self, user_id: &str) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn user_messages(&self, user_id: &str) -> Vec<(u64, Message)> {
        let mut collected = Vec::new();
        for session_id in self.user_session_ids(user_id) {
            if let Some(list) = self.messages.get(&session_id) {
                collected.extend(list.value().iter().cloned());
            }
        }
        collected.sort_by_key(|(seq, _)| *seq);
        collected
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_session(&self, session: &Session) -> CoreResult<bool> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(true)
            }
        }
    }

    async fn get_session(&self, session_id: &str) -> CoreResult<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                if at > session.last_activity_at {
                    session.last_activity_at = at;
                }
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn list_sessions(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<bool> {
        let existed = self.sessions.remove(session_id).is_some();
        let removed = self
            .messages
            .remove(session_id)
            .map(|(_, list)| list.len())
            .unwrap_or(0);
        debug!("Deleted session {} ({} messages)", session_id, removed);
        Ok(existed)
    }

    async fn increment_message_count(&self, session_id: &str, by: i64) -> CoreResult<i64> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.message_count += by;
                Ok(session.message_count)
            }
            None => Err(CoreError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn insert_message(&self, message: &Message) -> CoreResult<()> {
        if !self.sessions.contains_key(&message.session_id) {
            return Err(CoreError::NotFound(format!(
                "session {}",
                message.session_id
            )));
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.messages
            .entry(message.session_id.clone())
            .or_default()
            .push((seq, message.clone()));
        Ok(())
    }

    async fn insert_message_pair(&self, first: &Message, second: &Message) -> CoreResult<()> {
        if !self.sessions.contains_key(&first.session_id) {
            return Err(CoreError::NotFound(format!("session {}", first.session_id)));
        }
        let mut list = self.messages.entry(first.session_id.clone()).or_default();
        for message in [first, second] {
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            list.push((seq, message.clone()));
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Message>> {
        let Some(list) = self.messages.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = limit.map(|n| list.len().saturating_sub(n)).unwrap_or(0);
        Ok(list.iter().skip(skip).map(|(_, m)| m.clone()).collect())
    }

    async fn recent_messages_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<Message>> {
        let all = self.user_messages(user_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).map(|(_, m)| m).collect())
    }

    async fn upsert_fact(&self, fact: &UserFact) -> CoreResult<Uuid> {
        let key = (fact.user_id.clone(), fact.fact_type.clone());
        // Entry guard holds the shard lock for the whole read-modify-write.
        match self.facts.entry(key) {
            Entry::Occupied(mut existing) => {
                let live = existing.get_mut();
                live.fact_value = fact.fact_value.clone();
                live.confidence = fact.confidence;
                live.source_message_id = fact.source_message_id;
                live.updated_at = fact.updated_at;
                Ok(live.id)
            }
            Entry::Vacant(slot) => {
                slot.insert(fact.clone());
                Ok(fact.id)
            }
        }
    }

    async fn list_facts(&self, user_id: &str) -> CoreResult<Vec<UserFact>> {
        let mut facts: Vec<UserFact> = self
            .facts
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        facts.sort_by(|a, b| a.fact_type.cmp(&b.fact_type));
        Ok(facts)
    }

    async fn append_frustration_record(&self, record: &FrustrationRecord) -> CoreResult<()> {
        self.frustration.write().push(record.clone());
        Ok(())
    }

    async fn recent_frustration_records(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<FrustrationRecord>> {
        let records = self.frustration.read();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_activity_logs(&self, logs: &[ActivityLog]) -> CoreResult<usize> {
        self.activity_logs.write().extend_from_slice(logs);
        Ok(logs.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<SearchHit>> {
        match scope {
            SearchScope::Documents { dataset_id } => {
                let scored: Vec<(ReferenceChunk, f32)> = self
                    .references
                    .read()
                    .iter()
                    .filter(|(chunk, _)| match dataset_id {
                        Some(id) => chunk.dataset_id.as_deref() == Some(id.as_str()),
                        None => true,
                    })
                    .filter_map(|(chunk, embedding)| {
                        cosine_similarity(vector, embedding).map(|sim| (chunk.clone(), sim))
                    })
                    .collect();

                Ok(rank_by_similarity(scored, threshold, limit)
                    .into_iter()
                    .map(|(mut chunk, similarity)| {
                        chunk.similarity = similarity;
                        SearchHit::Reference(chunk)
                    })
                    .collect())
            }
            SearchScope::UserMessages { user_id } => {
                let scored: Vec<(Message, f32)> = self
                    .user_messages(user_id)
                    .into_iter()
                    .filter_map(|(_, message)| {
                        let sim = cosine_similarity(vector, message.embedding.as_deref()?)?;
                        Some((message, sim))
                    })
                    .collect();

                Ok(rank_by_similarity(scored, threshold, limit)
                    .into_iter()
                    .map(|(message, similarity)| SearchHit::Message {
                        message,
                        similarity,
                    })
                    .collect())
            }
        }
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Role;
    use serde_json::json;

    fn message(session_id: &str, content: &str, embedding: Option<Vec<f32>>) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
            embedding,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_insert_session_is_idempotent() {
        let storage = MemoryStorage::new();
        let session = Session::new("abc".into(), "u1", json!({}));
        assert!(storage.insert_session(&session).await.unwrap());
        assert!(!storage.insert_session(&session).await.unwrap());
        assert_eq!(storage.list_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_pair_lands_in_order_or_not_at_all() {
        let storage = MemoryStorage::new();
        let question = message("s1", "Which products are covered", None);
        let mut answer = message("s1", "Websites and shops", None);
        answer.role = Role::Assistant;

        assert!(storage.insert_message_pair(&question, &answer).await.is_err());
        assert!(storage.list_messages("s1", None).await.unwrap().is_empty());

        storage
            .insert_session(&Session::new("s1".into(), "u1", json!({})))
            .await
            .unwrap();
        storage.insert_message_pair(&question, &answer).await.unwrap();
        let roles: Vec<Role> = storage
            .list_messages("s1", None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_delete_cascades_messages() {
        let storage = MemoryStorage::new();
        storage
            .insert_session(&Session::new("s1".into(), "u1", json!({})))
            .await
            .unwrap();
        storage.insert_message(&message("s1", "hi", None)).await.unwrap();

        assert!(storage.delete_session("s1").await.unwrap());
        assert!(storage.list_messages("s1", None).await.unwrap().is_empty());
        assert!(storage.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_requires_session() {
        let storage = MemoryStorage::new();
        let err = storage
            .insert_message(&message("missing", "hi", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_messages_limit_keeps_latest() {
        let storage = MemoryStorage::new();
        storage
            .insert_session(&Session::new("s1".into(), "u1", json!({})))
            .await
            .unwrap();
        for i in 0..5 {
            storage
                .insert_message(&message("s1", &format!("m{}", i), None))
                .await
                .unwrap();
        }
        let last_two = storage.list_messages("s1", Some(2)).await.unwrap();
        let contents: Vec<_> = last_two.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_message_search_skips_missing_vectors_and_other_users() {
        let storage = MemoryStorage::new();
        storage
            .insert_session(&Session::new("s1".into(), "u1", json!({})))
            .await
            .unwrap();
        storage
            .insert_session(&Session::new("s2".into(), "u2", json!({})))
            .await
            .unwrap();
        storage
            .insert_message(&message("s1", "close", Some(vec![1.0, 0.1])))
            .await
            .unwrap();
        storage
            .insert_message(&message("s1", "no vector", None))
            .await
            .unwrap();
        storage
            .insert_message(&message("s2", "other user", Some(vec![1.0, 0.0])))
            .await
            .unwrap();

        let hits = storage
            .search(
                &[1.0, 0.0],
                &SearchScope::UserMessages {
                    user_id: "u1".into(),
                },
                10,
                0.5,
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        match &hits[0] {
            SearchHit::Message { message, .. } => assert_eq!(message.content, "close"),
            other => panic!("unexpected hit {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_search_filters_dataset() {
        let storage = MemoryStorage::new();
        let chunk = |id: &str, dataset: &str| ReferenceChunk {
            id: id.into(),
            dataset_id: Some(dataset.into()),
            title: "EAA".into(),
            content: "text".into(),
            similarity: 0.0,
        };
        storage.insert_reference_chunk(chunk("a", "eaa"), vec![1.0, 0.0]);
        storage.insert_reference_chunk(chunk("b", "gdpr"), vec![1.0, 0.0]);

        let hits = storage
            .search(
                &[1.0, 0.0],
                &SearchScope::Documents {
                    dataset_id: Some("eaa".into()),
                },
                5,
                0.0,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
    }
}
