use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FactsConfig;
use crate::database::{Storage, UserFact};
use crate::services::language_model::LanguageModel;
use crate::utils::{CoreError, CoreResult};

const DEFAULT_CONFIDENCE: f32 = 0.5;

const BUSINESS_KEYWORDS: &[&str] = &[
    // English
    "company", "business", "organization", "organisation", "firm", "we are", "we sell",
    "we offer", "we provide", "we operate", "our shop", "our store", "our website",
    "our app", "our service", "our product", "customers", "clients", "startup", "agency",
    "bank", "retailer", "operator", "publisher", "i work", "i am a", "i'm a", "my role",
    // German
    "unternehmen", "firma", "betrieb", "wir sind", "wir verkaufen", "wir bieten",
    "unser shop", "unsere website", "unsere app", "kunden", "mitarbeiter", "ich arbeite",
    "ich bin", "verlag", "händler",
];

static EMPLOYEE_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+\s*(\+\s*)?(employees|staff|people|team members|mitarbeiter(innen)?|beschäftigte)\b")
        .expect("employee count regex is valid")
});

static NON_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("identifier regex is valid"));

/// Cheap pre-filter so the model is only asked about messages that describe the user.
pub fn mentions_business(content: &str) -> bool {
    let lowered = content.to_lowercase();
    BUSINESS_KEYWORDS.iter().any(|k| lowered.contains(k)) || EMPLOYEE_COUNT.is_match(content)
}

/// "Business Type" / "business-type" / "businessType " -> "business_type".
pub fn to_snake_case(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.trim().chars() {
        if ch.is_uppercase() && prev_lower {
            spaced.push('_');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        spaced.extend(ch.to_lowercase());
    }
    NON_IDENT
        .replace_all(&spaced, "_")
        .trim_matches('_')
        .to_string()
}

/// Clamp into [0, 1]; missing or NaN becomes 0.5.
pub fn sanitize_confidence(raw: Option<f64>) -> f32 {
    match raw {
        Some(c) if !c.is_nan() => (c as f32).clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "facts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string"},
                        "value": {"type": "string"},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["type", "value"]
                }
            }
        },
        "required": ["facts"]
    })
}

fn extraction_prompt(content: &str) -> String {
    format!(
        r#"Extract durable facts the user states about themselves or their organization.
Use snake_case fact types. Prefix facts about the organization with "business_"
(for example business_type, business_name, business_size, business_sector, business_country,
business_channels). Use role, experience_level or location for personal facts.
Only include facts stated explicitly; give each a confidence between 0 and 1.
Return {{"facts": []}} when nothing applies.

Message:
"""{}""""#,
        content
    )
}

/// Owns durable, typed facts about a user.
#[derive(Clone)]
pub struct FactStore {
    storage: Arc<dyn Storage>,
    model: Arc<dyn LanguageModel>,
    config: FactsConfig,
}

impl FactStore {
    pub fn new(storage: Arc<dyn Storage>, model: Arc<dyn LanguageModel>, config: FactsConfig) -> Self {
        Self {
            storage,
            model,
            config,
        }
    }

    /// Last write wins per `(user_id, fact_type)`.
    pub async fn upsert(
        &self,
        user_id: &str,
        fact_type: &str,
        fact_value: &str,
        confidence: f32,
        source_message_id: Option<Uuid>,
    ) -> CoreResult<Uuid> {
        let fact_type = to_snake_case(fact_type);
        if fact_type.is_empty() || fact_value.trim().is_empty() {
            return Err(CoreError::Validation(
                "fact type and value must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let fact = UserFact {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            fact_type,
            fact_value: fact_value.trim().to_string(),
            confidence: sanitize_confidence(Some(f64::from(confidence))),
            source_message_id,
            created_at: now,
            updated_at: now,
        };
        let id = self.storage.upsert_fact(&fact).await?;
        debug!("Stored fact {}={} for {}", fact.fact_type, fact.fact_value, user_id);
        Ok(id)
    }

    pub async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<UserFact>> {
        self.storage.list_facts(user_id).await
    }

    /// Extract and store facts; returns how many were written.
    pub async fn try_extract(
        &self,
        user_id: &str,
        content: &str,
        session_id: &str,
        message_id: Option<Uuid>,
    ) -> CoreResult<usize> {
        if !mentions_business(content) {
            debug!("No fact keywords in message of session {}", session_id);
            return Ok(0);
        }

        let response = self
            .model
            .complete_structured(&extraction_prompt(content), &extraction_schema())
            .await?;

        let candidates = response
            .get("facts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut stored = 0;
        for candidate in candidates {
            let fact_type = candidate.get("type").and_then(Value::as_str).unwrap_or("");
            let value = match candidate.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            let confidence = sanitize_confidence(candidate.get("confidence").and_then(Value::as_f64));
            if confidence < self.config.confidence_floor {
                debug!("Dropping low-confidence fact {} ({:.2})", fact_type, confidence);
                continue;
            }

            match self
                .upsert(user_id, fact_type, &value, confidence, message_id)
                .await
            {
                Ok(_) => stored += 1,
                Err(CoreError::Validation(reason)) => debug!("Skipping fact: {}", reason),
                Err(e) => return Err(e),
            }
        }

        if stored > 0 {
            info!("Extracted {} facts for user {} from session {}", stored, user_id, session_id);
        }
        Ok(stored)
    }

    /// Best-effort variant of [`try_extract`](Self::try_extract): failures are logged and swallowed.
    pub async fn extract_from_message(
        &self,
        user_id: &str,
        content: &str,
        session_id: &str,
        message_id: Option<Uuid>,
    ) {
        if let Err(e) = self.try_extract(user_id, content, session_id, message_id).await {
            warn!("Fact extraction failed for session {}: {}", session_id, e);
        }
    }
}
