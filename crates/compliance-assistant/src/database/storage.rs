use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{FrustrationRecord, Message, SearchHit, SearchScope, Session, UserFact};
use crate::logging::ActivityLog;
use crate::utils::CoreResult;

/// Persistence capability required by the conversation engine.
///
/// Implementations must keep messages of one session in insertion order and
/// make `upsert_fact` atomic per `(user_id, fact_type)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns `false` when a session with the same id already exists.
    async fn insert_session(&self, session: &Session) -> CoreResult<bool>;

    async fn get_session(&self, session_id: &str) -> CoreResult<Option<Session>>;

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> CoreResult<()>;

    /// Most recently active first.
    async fn list_sessions(&self, user_id: &str) -> CoreResult<Vec<Session>>;

    /// Removes the session and all of its messages. Returns whether a row existed.
    async fn delete_session(&self, session_id: &str) -> CoreResult<bool>;

    /// Returns the counter value after the increment.
    async fn increment_message_count(&self, session_id: &str, by: i64) -> CoreResult<i64>;

    async fn insert_message(&self, message: &Message) -> CoreResult<()>;

    /// Both messages or neither, in argument order.
    async fn insert_message_pair(&self, first: &Message, second: &Message) -> CoreResult<()>;

    /// Chronological; with `limit`, only the last `limit` messages.
    async fn list_messages(&self, session_id: &str, limit: Option<usize>)
        -> CoreResult<Vec<Message>>;

    /// Last `limit` messages across every session of the user, chronological.
    async fn recent_messages_for_user(&self, user_id: &str, limit: usize)
        -> CoreResult<Vec<Message>>;

    /// Insert or overwrite the live fact for `(user_id, fact_type)`; returns the row id.
    async fn upsert_fact(&self, fact: &UserFact) -> CoreResult<Uuid>;

    async fn list_facts(&self, user_id: &str) -> CoreResult<Vec<UserFact>>;

    async fn append_frustration_record(&self, record: &FrustrationRecord) -> CoreResult<()>;

    /// Newest first.
    async fn recent_frustration_records(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<FrustrationRecord>>;

    async fn insert_activity_logs(&self, logs: &[ActivityLog]) -> CoreResult<usize>;

    /// Hits with similarity >= `threshold`, best first, at most `limit`.
    async fn search(
        &self,
        vector: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<SearchHit>>;

    async fn ping(&self) -> CoreResult<()>;
}
