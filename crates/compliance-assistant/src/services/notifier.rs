use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::database::SessionId;
use crate::utils::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    Frustration {
        level: f32,
        confidence: f32,
        triggers: Vec<String>,
    },
    MessageCount {
        count: i64,
    },
}

impl EscalationReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Frustration { .. } => "frustration",
            Self::MessageCount { .. } => "message_count",
        }
    }
}

/// Request for a human to look at a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationNotice {
    pub user_id: String,
    pub session_id: SessionId,
    pub reason: EscalationReason,
    pub summary: Option<String>,
}

impl EscalationNotice {
    pub fn subject(&self) -> String {
        match &self.reason {
            EscalationReason::Frustration { level, .. } => format!(
                "[Compliance Assistant] Frustrated user {} (level {:.2})",
                self.user_id, level
            ),
            EscalationReason::MessageCount { count } => format!(
                "[Compliance Assistant] Long conversation with {} ({} messages)",
                self.user_id, count
            ),
        }
    }

    pub fn body(&self) -> String {
        let mut body = format!("User: {}\nSession: {}\n", self.user_id, self.session_id);
        match &self.reason {
            EscalationReason::Frustration {
                level,
                confidence,
                triggers,
            } => {
                body.push_str(&format!(
                    "Reason: frustration level {:.2} (confidence {:.2})\n",
                    level, confidence
                ));
                if !triggers.is_empty() {
                    body.push_str(&format!("Triggers: {}\n", triggers.join(", ")));
                }
            }
            EscalationReason::MessageCount { count } => {
                body.push_str(&format!("Reason: session reached {} messages\n", count));
            }
        }
        if let Some(summary) = &self.summary {
            body.push_str(&format!("\nConversation summary:\n{}\n", summary));
        }
        body
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &EscalationNotice) -> CoreResult<()>;
}

/// Writes notices to the tracing log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> CoreResult<()> {
        warn!(
            user_id = %notice.user_id,
            session_id = %notice.session_id,
            reason = notice.reason.label(),
            "Escalation requested: {}",
            notice.subject()
        );
        Ok(())
    }
}

/// Sends notices by e-mail over async SMTP.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .with_context(|| format!("invalid SMTP relay {}", config.host))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            mailer,
            from: config.from.parse().context("invalid escalation sender")?,
            to: config.to.parse().context("invalid escalation recipient")?,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> CoreResult<()> {
        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notice.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(notice.body())
            .map_err(|e| CoreError::Validation(format!("escalation e-mail: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| CoreError::Storage(format!("smtp delivery failed: {}", e)))?;

        info!(
            "Escalation e-mail sent for session {} ({})",
            notice.session_id,
            notice.reason.label()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_includes_triggers_and_summary() {
        let notice = EscalationNotice {
            user_id: "u1".into(),
            session_id: "s1".into(),
            reason: EscalationReason::Frustration {
                level: 0.82,
                confidence: 0.9,
                triggers: vec!["useless".into()],
            },
            summary: Some("User asked about EAA deadlines".into()),
        };
        let body = notice.body();
        assert!(body.contains("Triggers: useless"));
        assert!(body.contains("EAA deadlines"));
        assert!(notice.subject().contains("0.82"));
    }

    #[test]
    fn test_message_count_subject() {
        let notice = EscalationNotice {
            user_id: "u1".into(),
            session_id: "s1".into(),
            reason: EscalationReason::MessageCount { count: 20 },
            summary: None,
        };
        assert!(notice.subject().contains("20 messages"));
        assert_eq!(notice.reason.label(), "message_count");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notice = EscalationNotice {
            user_id: "u1".into(),
            session_id: "s1".into(),
            reason: EscalationReason::MessageCount { count: 20 },
            summary: None,
        };
        assert!(LogNotifier.notify(&notice).await.is_ok());
    }
}
