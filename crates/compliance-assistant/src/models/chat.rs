use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::ReferenceChunk;
use crate::utils::text::preview;

const SOURCE_PREVIEW_CHARS: usize = 150;

fn default_user_id() -> String {
    "anonymous".to_string()
}

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000, message = "Question must be between 1 and 2000 characters"))]
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[validate(range(min = 0.0, max = 1.0, message = "similarity_threshold must be between 0 and 1"))]
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    #[validate(range(min = 1, max = 20, message = "max_chunks must be between 1 and 20"))]
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: None,
            user_id: default_user_id(),
            dataset_id: None,
            similarity_threshold: None,
            max_chunks: None,
            stream: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub id: String,
    pub title: String,
    pub preview: String, // first 150 chars
    pub similarity: f32,
}

impl From<&ReferenceChunk> for SourceInfo {
    fn from(chunk: &ReferenceChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            title: chunk.title.clone(),
            preview: preview(&chunk.content, SOURCE_PREVIEW_CHARS),
            similarity: chunk.similarity,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Performance {
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

/// Everything in a response except the answer text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMetadata {
    pub sources: Vec<SourceInfo>,
    pub performance: Performance,
    pub session_id: String,
    pub query_id: String,
    pub suggestions: Vec<String>,
    pub suggestions_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(flatten)]
    pub metadata: ChatMetadata,
}

/// Server-sent event payloads of a streamed answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamChunk {
    Chunk { delta: String },
    Metadata(ChatMetadata),
    Done,
}

impl ChatStreamChunk {
    /// SSE event name.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Metadata(_) => "metadata",
            Self::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: ChatRequest = serde_json::from_value(json!({"question": "What is the EAA?"})).unwrap();
        assert_eq!(request.user_id, "anonymous");
        assert!(!request.stream);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        assert!(ChatRequest::new("").validate().is_err());
        assert!(ChatRequest::new("x".repeat(2001)).validate().is_err());

        let mut request = ChatRequest::new("ok");
        request.similarity_threshold = Some(1.5);
        assert!(request.validate().is_err());

        let mut request = ChatRequest::new("ok");
        request.max_chunks = Some(0);
        assert!(request.validate().is_err());
        request.max_chunks = Some(20);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_response_is_flat() {
        let response = ChatResponse {
            answer: "Yes.".into(),
            metadata: ChatMetadata {
                sources: vec![],
                performance: Performance::default(),
                session_id: "s1".into(),
                query_id: "q1".into(),
                suggestions: vec!["Next?".into()],
                suggestions_header: "You might also want to ask:".into(),
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["answer"], "Yes.");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["performance"]["total_ms"], 0);
    }

    #[test]
    fn test_source_preview_is_truncated() {
        let chunk = ReferenceChunk {
            id: "c1".into(),
            dataset_id: None,
            title: "Art. 4".into(),
            content: "a".repeat(400),
            similarity: 0.9,
        };
        let source = SourceInfo::from(&chunk);
        assert_eq!(source.preview.chars().count(), 151);
    }
}
