use crate::config::EmbeddingConfig;
use crate::services::language_model::ModelError;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    content: &'a str,
    input: &'a str,
    model: &'a str,
}

/// Client for the embedding endpoint (llama.cpp `/embedding` or OpenAI-style payloads).
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text,
            input: text,
            model: &self.config.model,
        };

        let url = format!("{}/embedding", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.config.timeout_seconds)
                } else {
                    ModelError::Transport(format!("embedding server: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let json_value: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(format!("embedding response: {}", e)))?;

        let embedding = parse_embedding(&json_value).ok_or_else(|| {
            ModelError::Parse(format!("unrecognized embedding format: {}", json_value))
        })?;

        if embedding.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        if embedding.len() != self.config.dimension {
            return Err(ModelError::Parse(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.config.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

/// Accepts `{"embedding": [...]}`, `{"data": [{"embedding": [...]}]}`,
/// `[{"embedding": [...]}]` and a bare `[...]`.
fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    let floats = |arr: &Vec<Value>| -> Vec<f32> {
        arr.iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    };

    match value {
        Value::Object(map) => match (map.get("embedding"), map.get("data")) {
            (Some(Value::Array(arr)), _) => Some(floats(arr)),
            (_, Some(Value::Array(data))) => parse_embedding(data.first()?),
            _ => None,
        },
        Value::Array(arr) => match arr.first()? {
            Value::Object(_) => parse_embedding(&arr[0]),
            _ => Some(floats(arr)),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_llama_cpp_format() {
        assert_eq!(
            parse_embedding(&json!({"embedding": [0.5, 1.0]})),
            Some(vec![0.5, 1.0])
        );
    }

    #[test]
    fn test_parse_openai_formats() {
        assert_eq!(
            parse_embedding(&json!({"data": [{"embedding": [0.25]}]})),
            Some(vec![0.25])
        );
        assert_eq!(
            parse_embedding(&json!([{"embedding": [1.0, 2.0]}])),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(parse_embedding(&json!([3.0])), Some(vec![3.0]));
    }

    #[test]
    fn test_parse_unknown_format() {
        assert_eq!(parse_embedding(&json!({"vector": [1.0]})), None);
        assert_eq!(parse_embedding(&json!([])), None);
        assert_eq!(parse_embedding(&json!("nope")), None);
    }
}
