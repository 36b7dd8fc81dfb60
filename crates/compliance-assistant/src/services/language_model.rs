use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure of the hosted model service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model service unreachable: {0}")]
    Transport(String),

    #[error("model service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Per-call generation options. `None` falls back to the service defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Self::default()
        }
    }
}

/// Text generation and embedding capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> Result<String, ModelError>;

    /// Completion constrained to a JSON object described by `schema`.
    async fn complete_structured(&self, prompt: &str, schema: &Value) -> Result<Value, ModelError>;
}

/// Extract first JSON object substring from a possibly noisy model output.
/// Handles nested braces and braces inside JSON strings (with escapes).
pub fn extract_first_json_object(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        let Some(st) = start else {
            if ch == '{' {
                start = Some(i);
                depth = 1;
            }
            continue;
        };

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[st..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse the first JSON object found in `raw` (code fences and chatter are tolerated).
pub fn parse_structured(raw: &str) -> Result<Value, ModelError> {
    let candidate = extract_first_json_object(raw)
        .ok_or_else(|| ModelError::Parse("no JSON object in model output".to_string()))?;
    let value: Value =
        serde_json::from_str(candidate).map_err(|e| ModelError::Parse(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ModelError::Parse("model output is not a JSON object".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_skips_chatter_and_fences() {
        let raw = "Sure! ```json\n{\"facts\": [{\"type\": \"company_size\", \"value\": \"{50}\"}]}\n```";
        let json = extract_first_json_object(raw).unwrap();
        assert!(json.starts_with("{\"facts\""));
        assert!(json.ends_with("]}"));
    }

    #[test]
    fn test_extract_handles_escaped_quotes() {
        let raw = r#"{"summary": "user said \"hi}\""} trailing"#;
        assert_eq!(
            extract_first_json_object(raw),
            Some(r#"{"summary": "user said \"hi}\""}"#)
        );
    }

    #[test]
    fn test_extract_unbalanced_returns_none() {
        assert_eq!(extract_first_json_object("{\"a\": 1"), None);
        assert_eq!(extract_first_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_structured_rejects_non_objects() {
        assert!(parse_structured("[1, 2]").is_err());
        let value = parse_structured("result: {\"level\": 0.4}").unwrap();
        assert_eq!(value["level"], 0.4);
    }
}
