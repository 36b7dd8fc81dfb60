use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{
    FrustrationRecord, Message, ReferenceChunk, Role, SearchHit, SearchScope, Session, UserFact,
};
use super::storage::Storage;
use super::DbPool;
use crate::logging::ActivityLog;
use crate::utils::{CoreError, CoreResult};

fn insert_message_query(
    message: &Message,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"INSERT INTO chat_messages
           (id, session_id, role, content, created_at, embedding, metadata)
           VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
    )
    .bind(message.id)
    .bind(&message.session_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.created_at)
    .bind(message.embedding.clone().map(Vector::from))
    .bind(&message.metadata)
}

/// PostgreSQL + pgvector implementation of [`Storage`].
pub struct PgStorage {
    pool: DbPool,
    embedding_dimension: usize,
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    message_count: i64,
    metadata: Value,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
            message_count: row.message_count,
            metadata: row.metadata,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
    embedding: Option<Vector>,
    metadata: Value,
}

impl TryFrom<MessageRow> for Message {
    type Error = CoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| CoreError::Storage(format!("unknown message role '{}'", row.role)))?;
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            role,
            content: row.content,
            created_at: row.created_at,
            embedding: row.embedding.map(|v| v.to_vec()),
            metadata: row.metadata,
        })
    }
}

#[derive(FromRow)]
struct ScoredMessageRow {
    #[sqlx(flatten)]
    message: MessageRow,
    similarity: f32,
}

#[derive(FromRow)]
struct FactRow {
    id: Uuid,
    user_id: String,
    fact_type: String,
    fact_value: String,
    confidence: f32,
    source_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FactRow> for UserFact {
    fn from(row: FactRow) -> Self {
        UserFact {
            id: row.id,
            user_id: row.user_id,
            fact_type: row.fact_type,
            fact_value: row.fact_value,
            confidence: row.confidence,
            source_message_id: row.source_message_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct FrustrationRow {
    id: Uuid,
    user_id: String,
    session_id: String,
    frustration_level: f32,
    confidence_score: f32,
    should_escalate: bool,
    analysis: Value,
    created_at: DateTime<Utc>,
}

impl From<FrustrationRow> for FrustrationRecord {
    fn from(row: FrustrationRow) -> Self {
        FrustrationRecord {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            frustration_level: row.frustration_level,
            confidence_score: row.confidence_score,
            should_escalate: row.should_escalate,
            analysis: row.analysis,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReferenceRow {
    id: String,
    dataset_id: Option<String>,
    title: String,
    content: String,
    similarity: f32,
}

const MESSAGE_COLUMNS: &str =
    "m.id, m.session_id, m.role, m.content, m.created_at, m.embedding, m.metadata";

impl PgStorage {
    pub fn new(pool: DbPool, embedding_dimension: usize) -> Self {
        Self {
            pool,
            embedding_dimension,
        }
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn ensure_schema(&self) -> CoreResult<()> {
        let pool = self.pool.get_pool();

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_activity_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                message_count BIGINT NOT NULL DEFAULT 0,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            )"#,
        )
        .execute(pool)
        .await?;

        // Dimension is part of the column type, so it cannot be a bind parameter.
        let messages_ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id UUID PRIMARY KEY,
                seq BIGSERIAL NOT NULL,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                embedding vector({}),
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
            )"#,
            self.embedding_dimension
        );
        sqlx::query(&messages_ddl).execute(pool).await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_facts (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                fact_type TEXT NOT NULL,
                fact_value TEXT NOT NULL,
                confidence REAL NOT NULL,
                source_message_id UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT uq_user_fact_type UNIQUE (user_id, fact_type)
            )"#,
        )
        .execute(pool)
        .await?;

        // Audit rows outlive the session they describe.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS frustration_analyses (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                frustration_level REAL NOT NULL,
                confidence_score REAL NOT NULL,
                should_escalate BOOLEAN NOT NULL,
                analysis JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS activity_logs (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                activity_status TEXT NOT NULL,
                message_content TEXT,
                response_content TEXT,
                processing_time_ms INTEGER,
                llm_call_duration_ms INTEGER,
                retrieval_duration_ms INTEGER,
                error_message TEXT,
                error_type TEXT,
                details JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        let reference_ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS reference_chunks (
                id TEXT PRIMARY KEY,
                dataset_id TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding vector({}) NOT NULL
            )"#,
            self.embedding_dimension
        );
        sqlx::query(&reference_ddl).execute(pool).await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session_seq ON chat_messages(session_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_frustration_user_created ON frustration_analyses(user_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_reference_chunks_dataset ON reference_chunks(dataset_id)",
        ] {
            sqlx::query(ddl).execute(pool).await?;
        }

        debug!("Ensuring vector indexes exist...");
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_reference_chunks_embedding
               ON reference_chunks
               USING ivfflat (embedding vector_cosine_ops)
               WITH (lists = 100)"#,
        )
        .execute(pool)
        .await?;

        info!("Conversation schema ensured");
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn insert_session(&self, session: &Session) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO chat_sessions
               (id, user_id, created_at, last_activity_at, message_count, metadata)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.message_count)
        .bind(&session.metadata)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: &str) -> CoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"SELECT id, user_id, created_at, last_activity_at, message_count, metadata
               FROM chat_sessions WHERE id = $1"#,
        )
        .bind(session_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(Session::from))
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE chat_sessions
               SET last_activity_at = GREATEST(last_activity_at, $2)
               WHERE id = $1"#,
        )
        .bind(session_id)
        .bind(at)
        .execute(self.pool.get_pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"SELECT id, user_id, created_at, last_activity_at, message_count, metadata
               FROM chat_sessions
               WHERE user_id = $1
               ORDER BY last_activity_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_message_count(&self, session_id: &str, by: i64) -> CoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"UPDATE chat_sessions
               SET message_count = message_count + $2
               WHERE id = $1
               RETURNING message_count"#,
        )
        .bind(session_id)
        .bind(by)
        .fetch_optional(self.pool.get_pool())
        .await?;

        count.ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))
    }

    async fn insert_message(&self, message: &Message) -> CoreResult<()> {
        insert_message_query(message)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn insert_message_pair(&self, first: &Message, second: &Message) -> CoreResult<()> {
        let mut transaction = self.pool.get_pool().begin().await?;

        for message in [first, second] {
            insert_message_query(message)
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;
        debug!(
            "Inserted message pair {} / {} into {}",
            first.id, second.id, first.session_id
        );
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Message>> {
        // LIMIT NULL means no limit
        let sql = format!(
            r#"SELECT * FROM (
                   SELECT {}, m.seq FROM chat_messages m
                   WHERE m.session_id = $1
                   ORDER BY m.seq DESC
                   LIMIT $2
               ) recent
               ORDER BY recent.seq ASC"#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(session_id)
            .bind(limit.map(|n| n as i64))
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn recent_messages_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<Message>> {
        let sql = format!(
            r#"SELECT * FROM (
                   SELECT {}, m.seq FROM chat_messages m
                   JOIN chat_sessions s ON s.id = m.session_id
                   WHERE s.user_id = $1
                   ORDER BY m.seq DESC
                   LIMIT $2
               ) recent
               ORDER BY recent.seq ASC"#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn upsert_fact(&self, fact: &UserFact) -> CoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO user_facts
               (id, user_id, fact_type, fact_value, confidence, source_message_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (user_id, fact_type)
               DO UPDATE SET
                  fact_value = EXCLUDED.fact_value,
                  confidence = EXCLUDED.confidence,
                  source_message_id = EXCLUDED.source_message_id,
                  updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(fact.id)
        .bind(&fact.user_id)
        .bind(&fact.fact_type)
        .bind(&fact.fact_value)
        .bind(fact.confidence)
        .bind(fact.source_message_id)
        .bind(fact.created_at)
        .bind(fact.updated_at)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(id)
    }

    async fn list_facts(&self, user_id: &str) -> CoreResult<Vec<UserFact>> {
        let rows = sqlx::query_as::<_, FactRow>(
            r#"SELECT id, user_id, fact_type, fact_value, confidence, source_message_id,
                      created_at, updated_at
               FROM user_facts
               WHERE user_id = $1
               ORDER BY fact_type"#,
        )
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(UserFact::from).collect())
    }

    async fn append_frustration_record(&self, record: &FrustrationRecord) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO frustration_analyses
               (id, user_id, session_id, frustration_level, confidence_score,
                should_escalate, analysis, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(record.frustration_level)
        .bind(record.confidence_score)
        .bind(record.should_escalate)
        .bind(&record.analysis)
        .bind(record.created_at)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    async fn recent_frustration_records(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<FrustrationRecord>> {
        let rows = sqlx::query_as::<_, FrustrationRow>(
            r#"SELECT id, user_id, session_id, frustration_level, confidence_score,
                      should_escalate, analysis, created_at
               FROM frustration_analyses
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(FrustrationRecord::from).collect())
    }

    async fn insert_activity_logs(&self, logs: &[ActivityLog]) -> CoreResult<usize> {
        if logs.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO activity_logs (
                session_id, user_id, activity_type, activity_status,
                message_content, response_content,
                processing_time_ms, llm_call_duration_ms, retrieval_duration_ms,
                error_message, error_type, details, created_at
            ) "#,
        );

        query_builder.push_values(logs, |mut b, log| {
            b.push_bind(&log.session_id)
                .push_bind(&log.user_id)
                .push_bind(log.activity_type.as_str())
                .push_bind(log.activity_status.as_str())
                .push_bind(&log.message_content)
                .push_bind(&log.response_content)
                .push_bind(log.processing_time_ms)
                .push_bind(log.llm_call_duration_ms)
                .push_bind(log.retrieval_duration_ms)
                .push_bind(&log.error_message)
                .push_bind(&log.error_type)
                .push_bind(Value::Object(log.details.clone()))
                .push_bind(log.created_at);
        });

        let result = query_builder
            .build()
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<SearchHit>> {
        let query_vector = Vector::from(vector.to_vec());

        match scope {
            SearchScope::Documents { dataset_id } => {
                let rows = sqlx::query_as::<_, ReferenceRow>(
                    r#"SELECT id, dataset_id, title, content,
                              (1 - (embedding <=> $1))::float4 AS similarity
                       FROM reference_chunks
                       WHERE ($2::text IS NULL OR dataset_id = $2)
                         AND 1 - (embedding <=> $1) >= $3
                       ORDER BY embedding <=> $1
                       LIMIT $4"#,
                )
                .bind(query_vector)
                .bind(dataset_id.as_deref())
                .bind(threshold as f64)
                .bind(limit as i64)
                .fetch_all(self.pool.get_pool())
                .await?;

                debug!("Found {} reference chunks", rows.len());

                Ok(rows
                    .into_iter()
                    .map(|r| {
                        SearchHit::Reference(ReferenceChunk {
                            id: r.id,
                            dataset_id: r.dataset_id,
                            title: r.title,
                            content: r.content,
                            similarity: r.similarity,
                        })
                    })
                    .collect())
            }
            SearchScope::UserMessages { user_id } => {
                let sql = format!(
                    r#"SELECT {}, (1 - (m.embedding <=> $1))::float4 AS similarity
                       FROM chat_messages m
                       JOIN chat_sessions s ON s.id = m.session_id
                       WHERE s.user_id = $2
                         AND m.embedding IS NOT NULL
                         AND 1 - (m.embedding <=> $1) >= $3
                       ORDER BY m.embedding <=> $1
                       LIMIT $4"#,
                    MESSAGE_COLUMNS
                );
                let rows = sqlx::query_as::<_, ScoredMessageRow>(&sql)
                    .bind(query_vector)
                    .bind(user_id)
                    .bind(threshold as f64)
                    .bind(limit as i64)
                    .fetch_all(self.pool.get_pool())
                    .await?;

                rows.into_iter()
                    .map(|row| {
                        Ok(SearchHit::Message {
                            message: Message::try_from(row.message)?,
                            similarity: row.similarity,
                        })
                    })
                    .collect()
            }
        }
    }

    async fn ping(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }
}
