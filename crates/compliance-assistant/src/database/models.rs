use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One continuous conversation of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: i64,
    pub metadata: Value,
}

impl Session {
    pub fn new(id: SessionId, user_id: impl Into<String>, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            created_at: now,
            last_activity_at: now,
            message_count: 0,
            metadata,
        }
    }
}

/// Immutable entry of the message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserFact {
    pub id: Uuid,
    pub user_id: String,
    pub fact_type: String,
    pub fact_value: String,
    pub confidence: f32,
    pub source_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserFact {
    pub fn is_business(&self) -> bool {
        self.fact_type.starts_with("business_")
    }
}

/// Row of the append-only frustration audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrustrationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: SessionId,
    pub frustration_level: f32,
    pub confidence_score: f32,
    pub should_escalate: bool,
    /// Full analysis as serialized JSON
    pub analysis: Value,
    pub created_at: DateTime<Utc>,
}

/// Reference passage retrieved for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceChunk {
    pub id: String,
    pub dataset_id: Option<String>,
    pub title: String,
    pub content: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchScope {
    /// Reference passages, optionally restricted to one dataset
    Documents { dataset_id: Option<String> },
    /// Messages from every session owned by the user
    UserMessages { user_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchHit {
    Message { message: Message, similarity: f32 },
    Reference(ReferenceChunk),
}

impl SearchHit {
    pub fn similarity(&self) -> f32 {
        match self {
            Self::Message { similarity, .. } => *similarity,
            Self::Reference(chunk) => chunk.similarity,
        }
    }
}
