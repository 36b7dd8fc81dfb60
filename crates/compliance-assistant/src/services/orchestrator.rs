//! Request orchestration
//!
//! Sequences one incoming message: ensure session, classify, answer (canned or
//! retrieval-augmented), suggest, persist, then hand the advisory analyses to
//! the background queue.

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{ConversationConfig, FactsConfig, FrustrationConfig, Settings};
use crate::database::{ReferenceChunk, Role, SearchHit, SearchScope, Storage};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::{ChatMetadata, ChatRequest, ChatResponse, ChatStreamChunk, Performance, SourceInfo};
use crate::services::background::{BackgroundJob, BackgroundProcessor, BackgroundQueue};
use crate::services::classifier::{RequestClassifier, Route};
use crate::services::conversation::{
    ContextAssembler, ConversationSummarizer, FactStore, Language, MessageStore, RequestContext,
    ResolvedSession, SessionStore,
};
use crate::services::frustration::FrustrationScorer;
use crate::services::language_model::{CompletionOptions, LanguageModel, ModelError};
use crate::services::notifier::Notifier;
use crate::services::suggestions::SuggestionEngine;
use crate::utils::{CoreError, CoreResult};

const MAX_ATTEMPTS: u32 = 2;
const STREAM_DELTA_CHARS: usize = 24;
const PREVIOUS_TURN_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub conversation: ConversationConfig,
    pub facts: FactsConfig,
    pub frustration: FrustrationConfig,
    pub escalation_threshold: usize,
    pub answer_timeout: Duration,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            conversation: settings.conversation.clone(),
            facts: settings.facts.clone(),
            frustration: settings.frustration.clone(),
            escalation_threshold: settings.escalation.message_threshold,
            answer_timeout: Duration::from_secs(settings.llm.answer_timeout_seconds),
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of answering one (sub-)question.
struct Answer {
    text: String,
    sources: Vec<ReferenceChunk>,
    performance: Performance,
}

/// Split an answer into stream deltas of at most `max_chars_per_delta` characters.
pub fn stream_text_as_deltas(text: &str, max_chars_per_delta: usize) -> Vec<ChatStreamChunk> {
    if text.is_empty() {
        return vec![];
    }

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        buf.push(ch);
        count += 1;

        if count >= max_chars_per_delta.max(1) {
            out.push(ChatStreamChunk::Chunk {
                delta: std::mem::take(&mut buf),
            });
            count = 0;
        }
    }

    if !buf.is_empty() {
        out.push(ChatStreamChunk::Chunk { delta: buf });
    }
    out
}

/// Frames of a streamed response: answer deltas, then metadata, then done.
pub fn stream_frames(response: ChatResponse) -> Vec<ChatStreamChunk> {
    let mut frames = stream_text_as_deltas(&response.answer, STREAM_DELTA_CHARS);
    frames.push(ChatStreamChunk::Metadata(response.metadata));
    frames.push(ChatStreamChunk::Done);
    frames
}

fn answer_prompt(context: &str, chunks: &[ReferenceChunk], question: &str) -> String {
    let references = if chunks.is_empty() {
        "No reference material was found for this question.".to_string()
    } else {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}\n{}", i + 1, c.title, c.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "## Reference material\n{}\n\n{}\n\n## Question\n{}",
        references, context, question
    )
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    model: Arc<dyn LanguageModel>,
    sessions: SessionStore,
    messages: MessageStore,
    facts: FactStore,
    classifier: RequestClassifier,
    assembler: ContextAssembler,
    suggestions: SuggestionEngine,
    summarizer: ConversationSummarizer,
    frustration: FrustrationScorer,
    queue: BackgroundQueue,
    logger: ActivityLogger,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        model: Arc<dyn LanguageModel>,
        queue: BackgroundQueue,
        logger: ActivityLogger,
        config: OrchestratorConfig,
    ) -> Self {
        let sessions = SessionStore::new(storage.clone());
        let messages = MessageStore::new(
            storage.clone(),
            model.clone(),
            queue.clone(),
            config.escalation_threshold,
        );
        let facts = FactStore::new(storage.clone(), model.clone(), config.facts.clone());
        let assembler = ContextAssembler::new(
            messages.clone(),
            facts.clone(),
            model.clone(),
            config.conversation.clone(),
        );
        let suggestions = SuggestionEngine::new(
            storage.clone(),
            facts.clone(),
            messages.clone(),
            logger.clone(),
        );
        let summarizer = ConversationSummarizer::new(messages.clone(), model.clone());
        let frustration =
            FrustrationScorer::new(storage.clone(), model.clone(), config.frustration.clone());

        Self {
            classifier: RequestClassifier::new(model.clone()),
            storage,
            model,
            sessions,
            messages,
            facts,
            assembler,
            suggestions,
            summarizer,
            frustration,
            queue,
            logger,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn summarizer(&self) -> &ConversationSummarizer {
        &self.summarizer
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn logger(&self) -> &ActivityLogger {
        &self.logger
    }

    /// Job handler sharing this orchestrator's components.
    pub fn background_processor(&self, notifier: Arc<dyn Notifier>) -> BackgroundProcessor {
        BackgroundProcessor::new(
            self.facts.clone(),
            self.frustration.clone(),
            self.summarizer.clone(),
            notifier,
            self.queue.clone(),
            self.logger.clone(),
        )
    }

    #[instrument(skip_all, fields(user_id = %request.user_id))]
    pub async fn handle_message(&self, request: ChatRequest) -> CoreResult<ChatResponse> {
        let started = Instant::now();
        request.validate()?;
        let question = request.question.trim();
        if question.is_empty() {
            return Err(CoreError::Validation(
                "Question must not be blank".to_string(),
            ));
        }

        let language = Language::detect(question);
        let resolved = self
            .ensure_session(request.session_id.as_deref(), &request.user_id, language)
            .await?;

        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            query_id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            session_id: resolved.id.clone(),
            language,
            dataset_id: request.dataset_id.clone(),
            similarity_threshold: request
                .similarity_threshold
                .unwrap_or(self.config.conversation.default_similarity_threshold),
            max_chunks: request
                .max_chunks
                .unwrap_or(self.config.conversation.default_max_chunks),
        };

        self.logger.log(
            ActivityLog::builder(&ctx.session_id, &ctx.user_id, ActivityType::RequestReceived)
                .message(question)
                .status(ActivityStatus::Info)
                .custom("language", language.code())
                .build(),
        );

        let previous = self.previous_user_message(&ctx.session_id).await;
        let route = self.classifier.classify(question, previous.as_deref()).await;
        info!("Session {} routed as {}", ctx.session_id, route.label());
        self.logger.log(
            ActivityLog::builder(&ctx.session_id, &ctx.user_id, ActivityType::RouteSelected)
                .custom("route", route.label())
                .build(),
        );

        let answer = match &route {
            Route::Single => self.answer_question(&ctx, question).await?,
            Route::BusinessInfo => {
                self.facts
                    .extract_from_message(&ctx.user_id, question, &ctx.session_id, None)
                    .await;
                self.answer_question(&ctx, question).await?
            }
            Route::Multiple(questions) => self.answer_multiple(&ctx, questions).await?,
            canned => Answer {
                text: canned.canned_reply(language).unwrap_or_default(),
                sources: Vec::new(),
                performance: Performance::default(),
            },
        };

        let suggestions = self.suggestions.generate(&ctx, question).await;

        let metadata = json!({
            "route": route.label(),
            "query_id": ctx.query_id,
            "language": language.code(),
        });
        let [user_message_id, _] = self
            .persist_turn(&ctx.session_id, question, &answer.text, metadata)
            .await?;

        // Business-info turns were captured before answering.
        if route != Route::BusinessInfo {
            self.queue.submit(BackgroundJob::ExtractFacts {
                user_id: ctx.user_id.clone(),
                session_id: ctx.session_id.clone(),
                message_id: user_message_id,
                content: question.to_string(),
            });
        }
        self.queue.submit(BackgroundJob::ScoreFrustration {
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            message_id: Some(user_message_id),
            message: question.to_string(),
        });

        let mut performance = answer.performance;
        performance.total_ms = elapsed_ms(started);

        self.logger.log(
            ActivityLog::builder(&ctx.session_id, &ctx.user_id, ActivityType::MessageSent)
                .response(&answer.text)
                .status(ActivityStatus::Success)
                .processing_time(performance.total_ms as i32)
                .llm_duration(performance.generate_ms as i32)
                .retrieval_duration((performance.embedding_ms + performance.search_ms) as i32)
                .custom("sources", answer.sources.len())
                .build(),
        );

        Ok(ChatResponse {
            answer: answer.text,
            metadata: ChatMetadata {
                sources: answer.sources.iter().map(SourceInfo::from).collect(),
                performance,
                session_id: ctx.session_id,
                query_id: ctx.query_id,
                suggestions: suggestions.suggestions.into_iter().map(|s| s.text).collect(),
                suggestions_header: suggestions.header,
            },
        })
    }

    /// Same flow as [`handle_message`](Self::handle_message); errors surface
    /// before the first frame is produced.
    pub async fn handle_message_stream(
        &self,
        request: ChatRequest,
    ) -> CoreResult<BoxStream<'static, ChatStreamChunk>> {
        let response = self.handle_message(request).await?;
        Ok(stream::iter(stream_frames(response)).boxed())
    }

    async fn ensure_session(
        &self,
        requested: Option<&str>,
        user_id: &str,
        language: Language,
    ) -> CoreResult<ResolvedSession> {
        let metadata = json!({ "language": language.code() });
        let resolved = match self.sessions.resolve(requested, user_id, metadata.clone()).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_retryable() => {
                warn!("Session resolution failed ({}), retrying with a new session", e);
                let mut resolved = self.sessions.resolve(None, user_id, metadata).await?;
                resolved.fell_back = requested.is_some();
                resolved
            }
            Err(e) => return Err(e),
        };

        if resolved.fell_back {
            self.logger.log(
                ActivityLog::builder(&resolved.id, user_id, ActivityType::SessionFallback)
                    .status(ActivityStatus::Warning)
                    .custom("requested", requested.unwrap_or_default())
                    .build(),
            );
        } else if resolved.created {
            self.logger.log(
                ActivityLog::builder(&resolved.id, user_id, ActivityType::SessionCreated).build(),
            );
        }
        Ok(resolved)
    }

    async fn previous_user_message(&self, session_id: &str) -> Option<String> {
        match self.messages.recent(session_id, PREVIOUS_TURN_WINDOW).await {
            Ok(messages) => messages
                .into_iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content),
            Err(e) => {
                warn!("Previous turn of {} unavailable: {}", session_id, e);
                None
            }
        }
    }

    async fn answer_question(&self, ctx: &RequestContext, question: &str) -> CoreResult<Answer> {
        let mut performance = Performance::default();
        let sources = self.retrieve(ctx, question, &mut performance).await;
        let context = self.assembler.build_context(ctx, question).await;

        let options = CompletionOptions {
            system: Some(ContextAssembler::default_base_instruction(ctx.language)),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };
        let prompt = answer_prompt(&context, &sources, question);

        let generate_start = Instant::now();
        let text = self.generate_with_retry(ctx, &prompt, &options).await?;
        performance.generate_ms = elapsed_ms(generate_start);

        Ok(Answer {
            text,
            sources,
            performance,
        })
    }

    async fn answer_multiple(&self, ctx: &RequestContext, questions: &[String]) -> CoreResult<Answer> {
        debug!("Answering {} sub-questions", questions.len());
        let answers = futures::future::try_join_all(
            questions.iter().map(|q| self.answer_question(ctx, q)),
        )
        .await?;

        let mut combined = Answer {
            text: String::new(),
            sources: Vec::new(),
            performance: Performance::default(),
        };
        for (question, answer) in questions.iter().zip(answers) {
            if !combined.text.is_empty() {
                combined.text.push_str("\n\n");
            }
            combined.text.push_str(&format!("**{}**\n{}", question, answer.text));

            for source in answer.sources {
                if !combined.sources.iter().any(|s| s.id == source.id) {
                    combined.sources.push(source);
                }
            }
            combined.performance.embedding_ms += answer.performance.embedding_ms;
            combined.performance.search_ms += answer.performance.search_ms;
            combined.performance.generate_ms += answer.performance.generate_ms;
        }
        Ok(combined)
    }

    /// Reference passages for the question. Two failed attempts degrade to none.
    async fn retrieve(
        &self,
        ctx: &RequestContext,
        question: &str,
        performance: &mut Performance,
    ) -> Vec<ReferenceChunk> {
        let scope = SearchScope::Documents {
            dataset_id: ctx.dataset_id.clone(),
        };
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let embed_start = Instant::now();
            let vector = match self.model.embed(question).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("Query embedding attempt {} failed: {}", attempt, e);
                    last_error = Some(CoreError::from(e));
                    continue;
                }
            };
            performance.embedding_ms += elapsed_ms(embed_start);

            let search_start = Instant::now();
            let hits = self
                .storage
                .search(&vector, &scope, ctx.max_chunks, ctx.similarity_threshold)
                .await;
            performance.search_ms += elapsed_ms(search_start);

            match hits {
                Ok(hits) => {
                    let chunks: Vec<ReferenceChunk> = hits
                        .into_iter()
                        .filter_map(|hit| match hit {
                            SearchHit::Reference(chunk) => Some(chunk),
                            SearchHit::Message { .. } => None,
                        })
                        .collect();
                    debug!("Retrieved {} reference chunks", chunks.len());
                    return chunks;
                }
                Err(e) => {
                    warn!("Reference search attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!("Answering without references for session {}: {}", ctx.session_id, reason);
        self.logger.log(
            ActivityLog::builder(&ctx.session_id, &ctx.user_id, ActivityType::RetrievalDegraded)
                .status(ActivityStatus::Warning)
                .error(reason, "retrieval")
                .build(),
        );
        Vec::new()
    }

    async fn generate_with_retry(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: &CompletionOptions,
    ) -> CoreResult<String> {
        let timeout = self.config.answer_timeout;
        let mut last_error = ModelError::EmptyResponse;

        for attempt in 1..=MAX_ATTEMPTS {
            let result = match tokio::time::timeout(timeout, self.model.complete(prompt, options)).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(timeout.as_secs())),
            };

            match result {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => last_error = ModelError::EmptyResponse,
                Err(e) => last_error = e,
            }
            warn!("Answer generation attempt {} failed: {}", attempt, last_error);
        }

        error!("Answer generation failed after {} attempts: {}", MAX_ATTEMPTS, last_error);
        self.logger.log(
            ActivityLog::builder(&ctx.session_id, &ctx.user_id, ActivityType::LlmError)
                .status(ActivityStatus::Error)
                .error(last_error.to_string(), "model_service")
                .build(),
        );
        Err(last_error.into())
    }

    async fn persist_turn(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        metadata: serde_json::Value,
    ) -> CoreResult<[Uuid; 2]> {
        match self
            .messages
            .append_pair(session_id, question, answer, metadata.clone())
            .await
        {
            Err(e) if e.is_retryable() => {
                warn!("Persisting turn of {} failed ({}), retrying once", session_id, e);
                self.messages
                    .append_pair(session_id, question, answer, metadata)
                    .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryStorage, Session};
    use crate::services::language_model::MockLanguageModel;
    use flume::Receiver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator_with(
        model: MockLanguageModel,
        storage: Arc<MemoryStorage>,
    ) -> (Orchestrator, Receiver<BackgroundJob>) {
        let (queue, receiver) = BackgroundQueue::bounded(32);
        let orchestrator = Orchestrator::new(
            storage,
            Arc::new(model),
            queue,
            ActivityLogger::disabled(),
            OrchestratorConfig::default(),
        );
        (orchestrator, receiver)
    }

    fn answering_model(answer: &'static str) -> MockLanguageModel {
        let mut model = MockLanguageModel::new();
        model.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        model
            .expect_complete()
            .returning(move |_, _| Ok(answer.to_string()));
        model
    }

    fn reference(id: &str) -> ReferenceChunk {
        ReferenceChunk {
            id: id.into(),
            dataset_id: None,
            title: "EAA Article 4".into(),
            content: "Products placed on the market after 28 June 2025 must comply.".into(),
            similarity: 0.0,
        }
    }

    #[tokio::test]
    async fn test_single_question_uses_references_and_persists() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_reference_chunk(reference("c1"), vec![1.0, 0.0]);
        let (orchestrator, receiver) =
            orchestrator_with(answering_model("From 28 June 2025."), storage.clone());

        let response = orchestrator
            .handle_message(ChatRequest::new("When does the EAA apply?").with_user("u1"))
            .await
            .unwrap();

        assert_eq!(response.answer, "From 28 June 2025.");
        assert_eq!(response.metadata.sources.len(), 1);
        assert_eq!(response.metadata.sources[0].id, "c1");
        assert!(!response.metadata.suggestions.is_empty());

        let messages = orchestrator
            .messages()
            .list_for_session(&response.metadata.session_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);

        let kinds: Vec<&str> = receiver.drain().map(|job| job.kind()).collect();
        assert_eq!(kinds, vec!["extract_facts", "score_frustration"]);
    }

    #[tokio::test]
    async fn test_greeting_skips_model() {
        let mut model = MockLanguageModel::new();
        model.expect_complete().never();
        model.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        let (orchestrator, _receiver) = orchestrator_with(model, Arc::new(MemoryStorage::new()));

        let response = orchestrator
            .handle_message(ChatRequest::new("Hallo"))
            .await
            .unwrap();
        assert!(response.answer.starts_with("Hallo!"));
        assert!(response.metadata.sources.is_empty());
    }

    #[tokio::test]
    async fn test_supplied_session_id_is_created_and_reused() {
        let storage = Arc::new(MemoryStorage::new());
        let (orchestrator, _receiver) =
            orchestrator_with(answering_model("Yes."), storage.clone());

        let session_id = Uuid::new_v4().to_string();
        for _ in 0..2 {
            let response = orchestrator
                .handle_message(
                    ChatRequest::new("Does it cover e-books?")
                        .with_user("u1")
                        .with_session(session_id.clone()),
                )
                .await
                .unwrap();
            assert_eq!(response.metadata.session_id, session_id);
        }
        assert_eq!(storage.list_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_session_falls_back() {
        let storage = Arc::new(MemoryStorage::new());
        let owned = Uuid::new_v4().to_string();
        storage
            .insert_session(&Session::new(owned.clone(), "owner", json!({})))
            .await
            .unwrap();
        let (orchestrator, _receiver) = orchestrator_with(answering_model("Yes."), storage);

        let response = orchestrator
            .handle_message(
                ChatRequest::new("Does it cover e-books?")
                    .with_user("intruder")
                    .with_session(owned.clone()),
            )
            .await
            .unwrap();
        assert_ne!(response.metadata.session_id, owned);
    }

    #[tokio::test]
    async fn test_generation_is_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut model = MockLanguageModel::new();
        model.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        model.expect_complete().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ModelError::Status {
                    status: 503,
                    body: "busy".into(),
                })
            } else {
                Ok("Recovered.".into())
            }
        });
        let (orchestrator, _receiver) = orchestrator_with(model, Arc::new(MemoryStorage::new()));

        let response = orchestrator
            .handle_message(ChatRequest::new("Which services are covered?"))
            .await
            .unwrap();
        assert_eq!(response.answer, "Recovered.");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_and_persists_nothing() {
        let mut model = MockLanguageModel::new();
        model.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        model
            .expect_complete()
            .times(2)
            .returning(|_, _| Err(ModelError::Timeout(60)));
        let storage = Arc::new(MemoryStorage::new());
        let (orchestrator, receiver) = orchestrator_with(model, storage.clone());

        let result = orchestrator
            .handle_message(ChatRequest::new("Which services are covered?").with_user("u1"))
            .await;
        assert!(matches!(result, Err(CoreError::ModelService(_))));
        assert!(storage.recent_messages_for_user("u1", 10).await.unwrap().is_empty());
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_answers_without_references() {
        let mut model = MockLanguageModel::new();
        model
            .expect_embed()
            .returning(|_| Err(ModelError::Transport("refused".into())));
        model
            .expect_complete()
            .returning(|_, _| Ok("General answer.".into()));
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_reference_chunk(reference("c1"), vec![1.0, 0.0]);
        let (orchestrator, _receiver) = orchestrator_with(model, storage);

        let response = orchestrator
            .handle_message(ChatRequest::new("Which services are covered?"))
            .await
            .unwrap();
        assert_eq!(response.answer, "General answer.");
        assert!(response.metadata.sources.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_questions_are_answered_separately() {
        let (orchestrator, _receiver) =
            orchestrator_with(answering_model("Answer."), Arc::new(MemoryStorage::new()));

        let response = orchestrator
            .handle_message(ChatRequest::new(
                "Which products are covered? When do the rules apply?",
            ))
            .await
            .unwrap();
        assert!(response.answer.contains("**Which products are covered?**"));
        assert!(response.answer.contains("**When do the rules apply?**"));
    }

    #[tokio::test]
    async fn test_validation_errors_surface() {
        let (orchestrator, _receiver) =
            orchestrator_with(MockLanguageModel::new(), Arc::new(MemoryStorage::new()));
        let result = orchestrator.handle_message(ChatRequest::new("   ")).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_stream_frames_order() {
        let response = ChatResponse {
            answer: "a".repeat(50),
            metadata: ChatMetadata {
                sources: vec![],
                performance: Performance::default(),
                session_id: "s1".into(),
                query_id: "q1".into(),
                suggestions: vec![],
                suggestions_header: String::new(),
            },
        };
        let frames = stream_frames(response);
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].event(), "chunk");
        assert_eq!(frames[3].event(), "metadata");
        assert_eq!(frames[4], ChatStreamChunk::Done);
    }
}
