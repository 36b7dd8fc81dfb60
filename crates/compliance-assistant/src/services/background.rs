use async_trait::async_trait;
use flume::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BackgroundConfig;
use crate::database::SessionId;
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::services::conversation::{ConversationSummarizer, FactStore};
use crate::services::frustration::FrustrationScorer;
use crate::services::notifier::{EscalationNotice, EscalationReason, Notifier};
use crate::utils::CoreResult;

/// Fire-and-forget work that must never delay a response.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundJob {
    ExtractFacts {
        user_id: String,
        session_id: SessionId,
        message_id: Uuid,
        content: String,
    },
    ScoreFrustration {
        user_id: String,
        session_id: SessionId,
        message_id: Option<Uuid>,
        message: String,
    },
    NotifyEscalation(EscalationNotice),
}

impl BackgroundJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExtractFacts { .. } => "extract_facts",
            Self::ScoreFrustration { .. } => "score_frustration",
            Self::NotifyEscalation(_) => "notify_escalation",
        }
    }

    fn owner(&self) -> (&str, &str) {
        match self {
            Self::ExtractFacts {
                user_id,
                session_id,
                ..
            }
            | Self::ScoreFrustration {
                user_id,
                session_id,
                ..
            } => (user_id.as_str(), session_id.as_str()),
            Self::NotifyEscalation(notice) => (notice.user_id.as_str(), notice.session_id.as_str()),
        }
    }
}

/// Bounded work queue; submitting never blocks.
#[derive(Clone)]
pub struct BackgroundQueue {
    sender: Sender<BackgroundJob>,
}

impl BackgroundQueue {
    pub fn bounded(capacity: usize) -> (Self, Receiver<BackgroundJob>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Returns `false` when the job was dropped.
    pub fn submit(&self, job: BackgroundJob) -> bool {
        let kind = job.kind();
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!("Queued background job {}", kind);
                true
            }
            Err(e) => {
                warn!("Dropping background job {} (queue full?): {}", kind, e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &BackgroundJob) -> CoreResult<()>;
}

/// Start `config.workers` tasks draining `receiver`.
pub fn spawn_workers(
    receiver: Receiver<BackgroundJob>,
    handler: Arc<dyn JobHandler>,
    config: BackgroundConfig,
    logger: ActivityLogger,
) -> Vec<JoinHandle<()>> {
    info!(
        "Starting {} background workers (max_attempts={}, backoff={}ms)",
        config.workers, config.max_attempts, config.retry_backoff_ms
    );

    (0..config.workers.max(1))
        .map(|worker_id| {
            let receiver = receiver.clone();
            let handler = handler.clone();
            let config = config.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                while let Ok(job) = receiver.recv_async().await {
                    run_with_retry(worker_id, handler.as_ref(), &job, &config, &logger).await;
                }
                info!("Background worker {} shutting down (channel closed)", worker_id);
            })
        })
        .collect()
}

async fn run_with_retry(
    worker_id: usize,
    handler: &dyn JobHandler,
    job: &BackgroundJob,
    config: &BackgroundConfig,
    logger: &ActivityLogger,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match handler.handle(job).await {
            Ok(()) => {
                debug!("Worker {} finished {} (attempt {})", worker_id, job.kind(), attempt);
                return;
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                warn!(
                    "Worker {} job {} failed (attempt {}/{}): {}",
                    worker_id,
                    job.kind(),
                    attempt,
                    max_attempts,
                    e
                );
                tokio::time::sleep(Duration::from_millis(
                    config.retry_backoff_ms * u64::from(attempt),
                ))
                .await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "Worker {} job {} failed permanently after {} attempt(s): {}",
                    worker_id,
                    job.kind(),
                    attempt,
                    e
                );
                let (user_id, session_id) = job.owner();
                logger.log(
                    ActivityLog::builder(session_id, user_id, ActivityType::BackgroundJobFailed)
                        .error(e.to_string(), e.kind())
                        .custom("job", job.kind())
                        .custom("attempts", attempt)
                        .build(),
                );
                return;
            }
        }
    }
}

/// Executes jobs against the conversation components.
pub struct BackgroundProcessor {
    facts: FactStore,
    frustration: FrustrationScorer,
    summarizer: ConversationSummarizer,
    notifier: Arc<dyn Notifier>,
    queue: BackgroundQueue,
    logger: ActivityLogger,
}

impl BackgroundProcessor {
    pub fn new(
        facts: FactStore,
        frustration: FrustrationScorer,
        summarizer: ConversationSummarizer,
        notifier: Arc<dyn Notifier>,
        queue: BackgroundQueue,
        logger: ActivityLogger,
    ) -> Self {
        Self {
            facts,
            frustration,
            summarizer,
            notifier,
            queue,
            logger,
        }
    }
}

#[async_trait]
impl JobHandler for BackgroundProcessor {
    async fn handle(&self, job: &BackgroundJob) -> CoreResult<()> {
        match job {
            BackgroundJob::ExtractFacts {
                user_id,
                session_id,
                message_id,
                content,
            } => {
                let stored = self
                    .facts
                    .try_extract(user_id, content, session_id, Some(*message_id))
                    .await?;
                if stored > 0 {
                    self.logger.log(
                        ActivityLog::builder(session_id, user_id, ActivityType::FactsExtracted)
                            .custom("facts", stored)
                            .build(),
                    );
                }
                Ok(())
            }
            BackgroundJob::ScoreFrustration {
                user_id,
                session_id,
                message_id,
                message,
            } => {
                let escalated_before = self.frustration.has_escalated(user_id, session_id).await;
                let analysis = self
                    .frustration
                    .score(user_id, session_id, message, *message_id)
                    .await;

                self.logger.log(
                    ActivityLog::builder(session_id, user_id, ActivityType::FrustrationAnalyzed)
                        .custom("level", analysis.frustration_level)
                        .custom("confidence", analysis.confidence_score)
                        .custom("should_escalate", analysis.should_escalate)
                        .build(),
                );

                if analysis.should_escalate && escalated_before {
                    debug!("Session {} already escalated, no new notice", session_id);
                } else if analysis.should_escalate {
                    self.queue.submit(BackgroundJob::NotifyEscalation(EscalationNotice {
                        user_id: user_id.clone(),
                        session_id: session_id.clone(),
                        reason: EscalationReason::Frustration {
                            level: analysis.frustration_level,
                            confidence: analysis.confidence_score,
                            triggers: analysis.trigger_phrases.clone(),
                        },
                        summary: None,
                    }));
                }
                Ok(())
            }
            BackgroundJob::NotifyEscalation(notice) => {
                let mut notice = notice.clone();
                if notice.summary.is_none() {
                    notice.summary = match self.summarizer.summarize(&notice.session_id).await {
                        Ok(summary) => summary.map(|s| s.summary),
                        Err(e) => {
                            warn!("Summary for escalation of {} unavailable: {}", notice.session_id, e);
                            None
                        }
                    };
                }

                self.notifier.notify(&notice).await?;
                self.logger.log(
                    ActivityLog::builder(
                        &notice.session_id,
                        &notice.user_id,
                        ActivityType::EscalationTriggered,
                    )
                    .custom("reason", notice.reason.label())
                    .build(),
                );
                Ok(())
            }
        }
    }
}
