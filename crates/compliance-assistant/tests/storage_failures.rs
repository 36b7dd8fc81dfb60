use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use compliance_assistant::database::{
    FrustrationRecord, MemoryStorage, Message, Role, SearchHit, SearchScope, Session, Storage,
    UserFact,
};
use compliance_assistant::logging::{ActivityLog, ActivityLogger};
use compliance_assistant::models::ChatRequest;
use compliance_assistant::services::{
    BackgroundQueue, CompletionOptions, LanguageModel, ModelError, Orchestrator,
    OrchestratorConfig,
};
use compliance_assistant::utils::{CoreError, CoreResult};

const ANSWER: &str = "Websites and e-commerce services are covered.";

struct FixedModel;

#[async_trait]
impl LanguageModel for FixedModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(vec![text.len() as f32, 1.0, 0.5])
    }

    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String, ModelError> {
        Ok(ANSWER.to_string())
    }

    async fn complete_structured(&self, _prompt: &str, _schema: &Value) -> Result<Value, ModelError> {
        Err(ModelError::Parse("structured output disabled".to_string()))
    }
}

/// Memory storage whose first assistant write fails with a transient error.
struct FlakyStorage {
    inner: MemoryStorage,
    assistant_failures: AtomicUsize,
}

impl FlakyStorage {
    fn failing_once() -> Self {
        Self {
            inner: MemoryStorage::new(),
            assistant_failures: AtomicUsize::new(1),
        }
    }

    fn take_failure(&self) -> CoreResult<()> {
        let fail = self
            .assistant_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CoreError::Storage("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn insert_session(&self, session: &Session) -> CoreResult<bool> {
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> CoreResult<Option<Session>> {
        self.inner.get_session(session_id).await
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        self.inner.touch_session(session_id, at).await
    }

    async fn list_sessions(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        self.inner.list_sessions(user_id).await
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<bool> {
        self.inner.delete_session(session_id).await
    }

    async fn increment_message_count(&self, session_id: &str, by: i64) -> CoreResult<i64> {
        self.inner.increment_message_count(session_id, by).await
    }

    async fn insert_message(&self, message: &Message) -> CoreResult<()> {
        if message.role == Role::Assistant {
            self.take_failure()?;
        }
        self.inner.insert_message(message).await
    }

    async fn insert_message_pair(&self, first: &Message, second: &Message) -> CoreResult<()> {
        // The user row of a failed pair never lands.
        if second.role == Role::Assistant {
            self.take_failure()?;
        }
        self.inner.insert_message_pair(first, second).await
    }

    async fn list_messages(&self, session_id: &str, limit: Option<usize>) -> CoreResult<Vec<Message>> {
        self.inner.list_messages(session_id, limit).await
    }

    async fn recent_messages_for_user(&self, user_id: &str, limit: usize) -> CoreResult<Vec<Message>> {
        self.inner.recent_messages_for_user(user_id, limit).await
    }

    async fn upsert_fact(&self, fact: &UserFact) -> CoreResult<Uuid> {
        self.inner.upsert_fact(fact).await
    }

    async fn list_facts(&self, user_id: &str) -> CoreResult<Vec<UserFact>> {
        self.inner.list_facts(user_id).await
    }

    async fn append_frustration_record(&self, record: &FrustrationRecord) -> CoreResult<()> {
        self.inner.append_frustration_record(record).await
    }

    async fn recent_frustration_records(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<FrustrationRecord>> {
        self.inner.recent_frustration_records(user_id, limit).await
    }

    async fn insert_activity_logs(&self, logs: &[ActivityLog]) -> CoreResult<usize> {
        self.inner.insert_activity_logs(logs).await
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<SearchHit>> {
        self.inner.search(vector, scope, limit, threshold).await
    }

    async fn ping(&self) -> CoreResult<()> {
        self.inner.ping().await
    }
}

fn orchestrator(storage: Arc<FlakyStorage>) -> Orchestrator {
    let dyn_storage: Arc<dyn Storage> = storage;
    let (queue, _receiver) = BackgroundQueue::bounded(16);
    Orchestrator::new(
        dyn_storage,
        Arc::new(FixedModel),
        queue,
        ActivityLogger::disabled(),
        OrchestratorConfig::default(),
    )
}

#[tokio::test]
async fn test_transient_assistant_write_failure_keeps_one_exchange() {
    let storage = Arc::new(FlakyStorage::failing_once());
    let orchestrator = orchestrator(storage.clone());

    let response = orchestrator
        .handle_message(ChatRequest::new("Which products are covered").with_user("u1"))
        .await
        .unwrap();
    assert_eq!(response.answer, ANSWER);
    assert_eq!(storage.assistant_failures.load(Ordering::SeqCst), 0);

    let messages = storage
        .list_messages(&response.metadata.session_id, None)
        .await
        .unwrap();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(messages[0].content, "Which products are covered");
    assert_eq!(messages[1].content, ANSWER);

    let session = storage
        .get_session(&response.metadata.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.message_count, 2);
}
