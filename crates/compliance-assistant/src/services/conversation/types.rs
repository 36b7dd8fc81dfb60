use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::SessionId;
use crate::utils::text::{normalize, word_set};

const GERMAN_MARKERS: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "ich", "wir", "sie", "mit", "für", "ein",
    "eine", "wie", "was", "wer", "unser", "unsere", "unternehmen", "bitte", "danke", "gilt",
    "welche", "muss", "müssen", "können", "auf", "oder", "auch", "bei", "hallo",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "is", "not", "i", "we", "you", "with", "for", "a", "an", "how", "what",
    "who", "our", "company", "please", "thanks", "does", "apply", "which", "must", "can",
    "on", "or", "also", "at", "hello", "do",
];

/// Reply language of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    German,
}

impl Language {
    /// Stopword vote; ties and unknown text stay English.
    pub fn detect(text: &str) -> Self {
        let normalized = normalize(text);
        let words = word_set(&normalized);

        let german = GERMAN_MARKERS.iter().filter(|w| words.contains(*w)).count()
            + usize::from(text.contains(['ä', 'ö', 'ü', 'ß', 'Ä', 'Ö', 'Ü']));
        let english = ENGLISH_MARKERS.iter().filter(|w| words.contains(*w)).count();

        if german > english {
            Self::German
        } else {
            Self::English
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::German => "de",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::German => "German",
        }
    }

    /// Pick the variant of a bilingual string pair.
    pub fn pick<'a>(&self, english: &'a str, german: &'a str) -> &'a str {
        match self {
            Self::English => english,
            Self::German => german,
        }
    }
}

/// Per-request context threaded through every component.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub request_id: String,
    pub query_id: String,
    pub user_id: String,
    pub session_id: SessionId,
    pub language: Language,
    pub dataset_id: Option<String>,
    pub similarity_threshold: f32,
    pub max_chunks: usize,
}

/// Result of the "ensure session" step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub id: SessionId,
    /// A new row was written for this request
    pub created: bool,
    /// The supplied id could not be used and a generated one replaced it
    pub fell_back: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub session_id: SessionId,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub business_info: Value,
}

/// Lexical signals computed without the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextFactors {
    pub negative_keyword_count: usize,
    pub profanity_detected: bool,
    pub excessive_exclamation: bool,
    pub excessive_caps: bool,
    pub repeated_question: bool,
    pub prior_user_turns: usize,
    /// Combined lexical level in [0, 1]
    pub lexical_level: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FrustrationAnalysis {
    pub frustration_level: f32,
    pub confidence_score: f32,
    pub detected_patterns: Vec<String>,
    pub trigger_phrases: Vec<String>,
    pub context_factors: ContextFactors,
    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
}

impl FrustrationAnalysis {
    /// "No escalation" result used whenever analysis fails.
    pub fn safe_default() -> Self {
        Self::default()
    }
}
