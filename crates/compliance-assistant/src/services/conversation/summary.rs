use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::ConversationSummary;
use crate::database::{Message, Role};
use crate::services::conversation::MessageStore;
use crate::services::language_model::LanguageModel;
use crate::utils::text::preview;
use crate::utils::CoreResult;

/// Sessions shorter than this carry too little signal to summarize.
pub const MIN_MESSAGES_FOR_SUMMARY: usize = 4;

const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("deadline", "deadlines"),
    ("frist", "deadlines"),
    ("2025", "deadlines"),
    ("audit", "audit"),
    ("penalt", "penalties"),
    ("fine", "penalties"),
    ("bußgeld", "penalties"),
    ("exempt", "exemptions"),
    ("ausnahme", "exemptions"),
    ("microenterprise", "exemptions"),
    ("wcag", "technical requirements"),
    ("en 301 549", "technical requirements"),
    ("screen reader", "technical requirements"),
    ("statement", "documentation"),
    ("documentation", "documentation"),
    ("website", "websites and apps"),
    ("app", "websites and apps"),
    ("e-book", "e-books"),
    ("ticket", "transport services"),
    ("banking", "banking services"),
];

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "key_topics": {"type": "array", "items": {"type": "string"}},
            "business_info": {"type": "object"}
        },
        "required": ["summary", "key_topics"]
    })
}

fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keyword topics in first-seen order.
pub fn keyword_topics(messages: &[Message]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::User) {
        let lowered = message.content.to_lowercase();
        for (keyword, topic) in TOPIC_KEYWORDS {
            if lowered.contains(keyword) && !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
    }
    topics
}

/// Recomputes a session summary from the full message list on every call.
#[derive(Clone)]
pub struct ConversationSummarizer {
    messages: MessageStore,
    model: Arc<dyn LanguageModel>,
}

impl ConversationSummarizer {
    pub fn new(messages: MessageStore, model: Arc<dyn LanguageModel>) -> Self {
        Self { messages, model }
    }

    pub async fn summarize(&self, session_id: &str) -> CoreResult<Option<ConversationSummary>> {
        let messages = self.messages.list_for_session(session_id).await?;
        if messages.len() < MIN_MESSAGES_FOR_SUMMARY {
            debug!(
                "Session {} has {} messages, skipping summary",
                session_id,
                messages.len()
            );
            return Ok(None);
        }

        let prompt = format!(
            "Summarize this compliance consultation in two or three sentences, list its key \
             topics and collect anything the user said about their business.\n\n{}",
            transcript(&messages)
        );

        match self.model.complete_structured(&prompt, &summary_schema()).await {
            Ok(value) => Ok(Some(Self::from_model(session_id, &value, &messages))),
            Err(e) => {
                warn!("Model summary failed for {}: {}, using heuristic", session_id, e);
                Ok(Some(Self::heuristic(session_id, &messages)))
            }
        }
    }

    fn from_model(session_id: &str, value: &Value, messages: &[Message]) -> ConversationSummary {
        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(summary) = summary else {
            return Self::heuristic(session_id, messages);
        };

        let key_topics = value
            .get("key_topics")
            .and_then(Value::as_array)
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| keyword_topics(messages));

        ConversationSummary {
            session_id: session_id.to_string(),
            summary: summary.to_string(),
            key_topics,
            business_info: value
                .get("business_info")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| json!({})),
        }
    }

    fn heuristic(session_id: &str, messages: &[Message]) -> ConversationSummary {
        let first_question = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| preview(&m.content, 200))
            .unwrap_or_default();
        let user_turns = messages.iter().filter(|m| m.role == Role::User).count();

        ConversationSummary {
            session_id: session_id.to_string(),
            summary: format!(
                "Conversation of {} user turns starting with: \"{}\"",
                user_turns, first_question
            ),
            key_topics: keyword_topics(messages),
            business_info: json!({}),
        }
    }
}
