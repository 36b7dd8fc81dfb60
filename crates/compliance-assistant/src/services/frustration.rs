//! Frustration scoring
//! Lexical signals are computed locally, the model supplies its own reading,
//! and the two are reconciled into one escalation decision per user turn.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FrustrationConfig;
use crate::database::{FrustrationRecord, Message, Role, Storage};
use crate::services::conversation::{ContextFactors, FrustrationAnalysis};
use crate::services::language_model::LanguageModel;
use crate::utils::text::{jaccard, normalize, word_set};
use crate::utils::CoreResult;

const MODEL_WEIGHT: f32 = 0.7;
const LEXICAL_WEIGHT: f32 = 0.3;
const REPEAT_THRESHOLD: f32 = 0.6;
const EXCLAMATION_MIN: usize = 3;
const CAPS_RATIO: f32 = 0.6;
const CAPS_MIN_LETTERS: usize = 10;
const ESCALATION_LOOKBACK: usize = 50;

// Matched against the normalized text, so contractions are already expanded.
const NEGATIVE_KEYWORDS: &[&str] = &[
    // English
    "useless", "not helpful", "unhelpful", "frustrat", "annoy", "ridiculous", "waste of time",
    "does not help", "did not help", "still do not", "makes no sense", "terrible", "awful",
    "stupid", "wrong again", "not what i asked", "give up", "fed up", "angry",
    // German
    "nutzlos", "hilft nicht", "hilft mir nicht", "ärgerlich", "frustriert", "zeitverschwendung",
    "schon wieder", "unverschämt", "sinnlos", "keine ahnung", "nervt", "verstehe nicht",
];

// Whole-word matches only ("mist" must not hit "mistake").
const PROFANITY: &[&str] = &[
    "damn", "shit", "fuck", "fucking", "crap", "wtf", "bullshit", "hell", "scheiße", "scheisse",
    "mist", "verdammt", "kacke",
];

fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "frustration_level": {"type": "number", "minimum": 0, "maximum": 1},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "patterns": {"type": "array", "items": {"type": "string"}},
            "triggers": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["frustration_level", "confidence"]
    })
}

fn analysis_prompt(message: &str, context: &[Message]) -> String {
    let history = context
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Rate how frustrated the user is in their latest message of a compliance consultation.
Consider tone, repetition and whether earlier answers seem to have failed them.
frustration_level and confidence are between 0 and 1. List observed patterns
(for example repetition, sarcasm, impatience) and the exact trigger phrases.

Conversation so far:
{}

Latest user message:
"""{}""""#,
        history, message
    )
}

/// Model reading of one turn.
#[derive(Debug, Clone, Default, PartialEq)]
struct ModelReading {
    level: f32,
    confidence: f32,
    patterns: Vec<String>,
    triggers: Vec<String>,
}

fn unit(value: Option<&Value>) -> f32 {
    match value.and_then(Value::as_f64) {
        Some(v) if !v.is_nan() => (v as f32).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ModelReading {
    fn from_value(value: &Value) -> Self {
        Self {
            level: unit(value.get("frustration_level")),
            confidence: unit(value.get("confidence")),
            patterns: strings(value.get("patterns")),
            triggers: strings(value.get("triggers")),
        }
    }
}

/// Escalate only when every threshold is met.
pub fn should_escalate(
    level: f32,
    confidence: f32,
    trigger_count: usize,
    config: &FrustrationConfig,
) -> bool {
    level >= config.level_threshold
        && confidence >= config.confidence_threshold
        && trigger_count >= config.min_triggers
}

fn excessive_caps(message: &str) -> bool {
    let letters: Vec<char> = message.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < CAPS_MIN_LETTERS {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f32 / letters.len() as f32 >= CAPS_RATIO
}

/// Lexical factors plus the trigger words that produced them.
///
/// `earlier_user_messages` must not contain the message being scored.
pub fn lexical_factors(message: &str, earlier_user_messages: &[&str]) -> (ContextFactors, Vec<String>) {
    let normalized = normalize(message);
    let words = word_set(&normalized);

    let mut triggers: Vec<String> = NEGATIVE_KEYWORDS
        .iter()
        .filter(|k| normalized.contains(*k))
        .map(|k| k.to_string())
        .collect();
    let negative_keyword_count = triggers.len();

    let profane: Vec<String> = PROFANITY
        .iter()
        .filter(|p| words.contains(*p))
        .map(|p| p.to_string())
        .collect();
    let profanity_detected = !profane.is_empty();
    triggers.extend(profane);

    let excessive_exclamation = message.matches('!').count() >= EXCLAMATION_MIN;
    let excessive_caps = excessive_caps(message);
    let repeated_question = normalized.len() >= 5
        && earlier_user_messages
            .iter()
            .any(|earlier| jaccard(&normalize(earlier), &normalized) >= REPEAT_THRESHOLD);
    let prior_user_turns = earlier_user_messages.len();

    let mut level = (negative_keyword_count as f32 * 0.15).min(0.45);
    if profanity_detected {
        level += 0.35;
    }
    if excessive_exclamation {
        level += 0.1;
    }
    if excessive_caps {
        level += 0.1;
    }
    if repeated_question {
        level += 0.2;
    }
    level += (prior_user_turns.min(5) as f32) * 0.02;

    let factors = ContextFactors {
        negative_keyword_count,
        profanity_detected,
        excessive_exclamation,
        excessive_caps,
        repeated_question,
        prior_user_turns,
        lexical_level: level.clamp(0.0, 1.0),
    };
    (factors, triggers)
}

fn lexical_patterns(factors: &ContextFactors) -> Vec<String> {
    let flags = [
        (factors.profanity_detected, "profanity"),
        (factors.excessive_exclamation, "excessive_exclamation"),
        (factors.excessive_caps, "excessive_caps"),
        (factors.repeated_question, "repeated_question"),
        (factors.negative_keyword_count > 0, "negative_language"),
    ];
    flags
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| name.to_string())
        .collect()
}

fn merge_unique(into: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !into.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}

/// Escalation-risk scorer. Runs as a background job and never fails its caller.
#[derive(Clone)]
pub struct FrustrationScorer {
    storage: Arc<dyn Storage>,
    model: Arc<dyn LanguageModel>,
    config: FrustrationConfig,
}

impl FrustrationScorer {
    pub fn new(
        storage: Arc<dyn Storage>,
        model: Arc<dyn LanguageModel>,
        config: FrustrationConfig,
    ) -> Self {
        Self {
            storage,
            model,
            config,
        }
    }

    /// Analyze one user turn and append it to the audit log.
    /// Any failure yields [`FrustrationAnalysis::safe_default`].
    pub async fn score(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        message_id: Option<Uuid>,
    ) -> FrustrationAnalysis {
        let analysis = match self.analyze(session_id, message, message_id).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Frustration analysis failed for session {}: {}", session_id, e);
                FrustrationAnalysis::safe_default()
            }
        };

        if analysis.should_escalate {
            info!(
                "Escalation recommended for session {} (level {:.2}, confidence {:.2})",
                session_id, analysis.frustration_level, analysis.confidence_score
            );
        }

        if let Err(e) = self.record(user_id, session_id, &analysis).await {
            warn!("Frustration record for session {} not written: {}", session_id, e);
        }
        analysis
    }

    /// Whether an earlier turn of this session already recommended escalation.
    /// Lookup failures answer `false` so a notice is never lost.
    pub async fn has_escalated(&self, user_id: &str, session_id: &str) -> bool {
        match self
            .storage
            .recent_frustration_records(user_id, ESCALATION_LOOKBACK)
            .await
        {
            Ok(records) => records
                .iter()
                .any(|r| r.session_id == session_id && r.should_escalate),
            Err(e) => {
                warn!("Escalation history for session {} unavailable: {}", session_id, e);
                false
            }
        }
    }

    async fn analyze(
        &self,
        session_id: &str,
        message: &str,
        message_id: Option<Uuid>,
    ) -> CoreResult<FrustrationAnalysis> {
        let context = self
            .storage
            .list_messages(session_id, Some(self.config.context_messages))
            .await?;

        let mut earlier: Vec<&Message> = context
            .iter()
            .filter(|m| m.role == Role::User)
            .filter(|m| Some(m.id) != message_id)
            .collect();
        // Without an id the scored turn may already be the newest user row.
        if message_id.is_none() && earlier.last().is_some_and(|m| m.content == message) {
            earlier.pop();
        }
        let earlier_texts: Vec<&str> = earlier.iter().map(|m| m.content.as_str()).collect();

        let (factors, lexical_triggers) = lexical_factors(message, &earlier_texts);

        let value = self
            .model
            .complete_structured(&analysis_prompt(message, &context), &analysis_schema())
            .await?;
        let reading = ModelReading::from_value(&value);

        let level = (MODEL_WEIGHT * reading.level + LEXICAL_WEIGHT * factors.lexical_level)
            .clamp(0.0, 1.0);

        let mut triggers = reading.triggers;
        merge_unique(&mut triggers, lexical_triggers);
        let mut patterns = reading.patterns;
        merge_unique(&mut patterns, lexical_patterns(&factors));

        let escalate = should_escalate(level, reading.confidence, triggers.len(), &self.config);
        let escalation_reason = escalate.then(|| {
            format!(
                "frustration level {:.2} with confidence {:.2}; triggers: {}",
                level,
                reading.confidence,
                triggers.join(", ")
            )
        });

        debug!(
            "Session {}: model {:.2}, lexical {:.2}, final {:.2}",
            session_id, reading.level, factors.lexical_level, level
        );

        Ok(FrustrationAnalysis {
            frustration_level: level,
            confidence_score: reading.confidence,
            detected_patterns: patterns,
            trigger_phrases: triggers,
            context_factors: factors,
            should_escalate: escalate,
            escalation_reason,
        })
    }

    async fn record(
        &self,
        user_id: &str,
        session_id: &str,
        analysis: &FrustrationAnalysis,
    ) -> CoreResult<()> {
        let record = FrustrationRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            frustration_level: analysis.frustration_level,
            confidence_score: analysis.confidence_score,
            should_escalate: analysis.should_escalate,
            analysis: serde_json::to_value(analysis).unwrap_or_else(|_| json!({})),
            created_at: Utc::now(),
        };
        self.storage.append_frustration_record(&record).await
    }
}
