use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    RequestReceived,
    MessageSent,
    RouteSelected,
    SessionCreated,
    SessionFallback,
    SessionDeleted,
    RetrievalDegraded,
    FactsExtracted,
    FrustrationAnalyzed,
    EscalationTriggered,
    SuggestionsGenerated,
    BackgroundJobFailed,
    LlmError,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestReceived => "request_received",
            Self::MessageSent => "message_sent",
            Self::RouteSelected => "route_selected",
            Self::SessionCreated => "session_created",
            Self::SessionFallback => "session_fallback",
            Self::SessionDeleted => "session_deleted",
            Self::RetrievalDegraded => "retrieval_degraded",
            Self::FactsExtracted => "facts_extracted",
            Self::FrustrationAnalyzed => "frustration_analyzed",
            Self::EscalationTriggered => "escalation_triggered",
            Self::SuggestionsGenerated => "suggestions_generated",
            Self::BackgroundJobFailed => "background_job_failed",
            Self::LlmError => "llm_error",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub session_id: String,
    pub user_id: String,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    pub message_content: Option<String>,
    pub response_content: Option<String>,

    pub processing_time_ms: Option<i32>,
    pub llm_call_duration_ms: Option<i32>,
    pub retrieval_duration_ms: Option<i32>,

    pub error_message: Option<String>,
    pub error_type: Option<String>,

    /// Free-form analytics (route, counts, scores)
    pub details: Map<String, Value>,

    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        activity_type: ActivityType,
    ) -> ActivityLogBuilder {
        ActivityLogBuilder::new(session_id.into(), user_id.into(), activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(session_id: String, user_id: String, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                session_id,
                user_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                message_content: None,
                response_content: None,
                processing_time_ms: None,
                llm_call_duration_ms: None,
                retrieval_duration_ms: None,
                error_message: None,
                error_type: None,
                details: Map::new(),
                created_at: Utc::now(),
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn processing_time(mut self, ms: i32) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn llm_duration(mut self, ms: i32) -> Self {
        self.log.llm_call_duration_ms = Some(ms);
        self
    }

    pub fn retrieval_duration(mut self, ms: i32) -> Self {
        self.log.retrieval_duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log.details.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_and_error() {
        let log = ActivityLog::builder("s1", "u1", ActivityType::LlmError)
            .message("what is the EAA?")
            .error("timeout", "ModelServiceError")
            .custom("attempt", 2)
            .build();

        assert_eq!(log.activity_status, ActivityStatus::Error);
        assert_eq!(log.error_type.as_deref(), Some("ModelServiceError"));
        assert_eq!(log.details["attempt"], 2);
        assert_eq!(log.activity_type.as_str(), "llm_error");
    }
}
