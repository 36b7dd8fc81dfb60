use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use compliance_assistant::database::{MemoryStorage, Role, Storage};
use compliance_assistant::logging::ActivityLogger;
use compliance_assistant::models::{ChatRequest, ChatResponse};
use compliance_assistant::services::background::JobHandler;
use compliance_assistant::services::notifier::{EscalationNotice, EscalationReason};
use compliance_assistant::services::{
    BackgroundJob, BackgroundProcessor, BackgroundQueue, CompletionOptions, LanguageModel,
    ModelError, Notifier, Orchestrator, OrchestratorConfig,
};
use compliance_assistant::utils::CoreResult;

const ANSWER: &str = "Online shops must meet the accessibility requirements from 28 June 2025.";

/// Deterministic stand-in for the hosted model.
#[derive(Default)]
struct ScriptedModel {
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn answer_prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

fn letter_histogram(text: &str) -> Vec<f32> {
    let mut counts = vec![0.0f32; 27];
    for c in text.to_lowercase().chars() {
        match c {
            'a'..='z' => counts[(c as u8 - b'a') as usize] += 1.0,
            _ => counts[26] += 0.1,
        }
    }
    counts
}

fn rate_frustration(message: &str) -> Value {
    let lowered = message.to_lowercase();
    if lowered.contains("damn") {
        json!({
            "frustration_level": 0.95,
            "confidence": 0.9,
            "patterns": ["anger", "impatience"],
            "triggers": ["DAMN IT", "USELESS"]
        })
    } else if lowered.contains("not helpful") || lowered.contains("still") {
        json!({
            "frustration_level": 0.4,
            "confidence": 0.6,
            "patterns": ["repetition"],
            "triggers": []
        })
    } else {
        json!({
            "frustration_level": 0.05,
            "confidence": 0.9,
            "patterns": [],
            "triggers": []
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(letter_histogram(text))
    }

    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String, ModelError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(ANSWER.to_string())
    }

    async fn complete_structured(&self, prompt: &str, schema: &Value) -> Result<Value, ModelError> {
        let properties = &schema["properties"];
        if properties.get("frustration_level").is_some() {
            let latest = prompt.rsplit("Latest user message:").next().unwrap_or(prompt);
            return Ok(rate_frustration(latest));
        }
        if properties.get("facts").is_some() {
            if prompt.contains("online shop") {
                return Ok(json!({"facts": [
                    {"type": "business_type", "value": "online shop", "confidence": 0.95},
                    {"type": "business_size", "value": "40 employees", "confidence": 0.9}
                ]}));
            }
            return Ok(json!({"facts": []}));
        }
        if properties.get("summary").is_some() {
            return Ok(json!({
                "summary": "The user asked about accessibility deadlines.",
                "key_topics": ["deadlines"]
            }));
        }
        Err(ModelError::Parse("unexpected schema".to_string()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<EscalationNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> CoreResult<()> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

struct Harness {
    storage: Arc<MemoryStorage>,
    model: Arc<ScriptedModel>,
    notifier: Arc<RecordingNotifier>,
    orchestrator: Orchestrator,
    processor: BackgroundProcessor,
    receiver: flume::Receiver<BackgroundJob>,
}

impl Harness {
    fn new(config: OrchestratorConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let model = Arc::new(ScriptedModel::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, receiver) = BackgroundQueue::bounded(64);

        let dyn_storage: Arc<dyn Storage> = storage.clone();
        let dyn_model: Arc<dyn LanguageModel> = model.clone();
        let orchestrator = Orchestrator::new(
            dyn_storage,
            dyn_model,
            queue,
            ActivityLogger::disabled(),
            config,
        );
        let dyn_notifier: Arc<dyn Notifier> = notifier.clone();
        let processor = orchestrator.background_processor(dyn_notifier);

        Self {
            storage,
            model,
            notifier,
            orchestrator,
            processor,
            receiver,
        }
    }

    /// One turn plus every background job it caused, run to completion.
    async fn turn(&self, session_id: Option<&str>, question: &str) -> ChatResponse {
        let mut request = ChatRequest::new(question).with_user("u1");
        if let Some(session_id) = session_id {
            request = request.with_session(session_id);
        }
        let response = self.orchestrator.handle_message(request).await.unwrap();
        self.drain().await;
        response
    }

    async fn drain(&self) {
        while let Ok(job) = self.receiver.try_recv() {
            self.processor.handle(&job).await.unwrap();
        }
    }

    fn notices(&self) -> Vec<EscalationNotice> {
        self.notifier.notices.lock().clone()
    }
}

#[tokio::test]
async fn test_escalating_frustration_notifies_once_it_crosses_the_threshold() {
    let harness = Harness::new(OrchestratorConfig::default());
    let turns = [
        "Which products fall under the accessibility act",
        "That was not helpful, what about online shops in particular",
        "I still do not understand what applies to our checkout page",
        "You keep repeating yourself, what exactly must change by next summer",
        "THIS IS USELESS, DAMN IT! GIVE ME A STRAIGHT ANSWER!!!",
    ];

    let first = harness.turn(None, turns[0]).await;
    let session_id = first.metadata.session_id.clone();
    for question in &turns[1..4] {
        harness.turn(Some(&session_id), question).await;
        assert!(harness.notices().is_empty(), "escalated early on {:?}", question);
    }

    harness.turn(Some(&session_id), turns[4]).await;

    let records = harness.storage.recent_frustration_records("u1", 10).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records[0].should_escalate);
    assert!(records[0].frustration_level >= 0.6);
    assert!(records[1..].iter().all(|r| !r.should_escalate));

    let notices = harness.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].session_id, session_id);
    assert!(matches!(notices[0].reason, EscalationReason::Frustration { .. }));
    assert!(notices[0].summary.is_some());
}

#[tokio::test]
async fn test_sustained_frustration_notifies_once_per_session() {
    let harness = Harness::new(OrchestratorConfig::default());

    let first = harness
        .turn(None, "THIS IS USELESS, DAMN IT! GIVE ME A STRAIGHT ANSWER!!!")
        .await;
    let session_id = first.metadata.session_id.clone();
    harness
        .turn(Some(&session_id), "DAMN IT, STILL NOTHING USEFUL ABOUT OUR CHECKOUT!!!")
        .await;

    let records = harness.storage.recent_frustration_records("u1", 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.should_escalate));
    assert_eq!(harness.notices().len(), 1);

    let other = harness
        .turn(None, "DAMN IT, THIS ASSISTANT IS USELESS FOR BANKS!!!")
        .await;
    assert_ne!(other.metadata.session_id, session_id);
    assert_eq!(harness.notices().len(), 2);
}

#[tokio::test]
async fn test_neutral_conversation_never_escalates() {
    let harness = Harness::new(OrchestratorConfig::default());
    let turns = [
        "Which products fall under the accessibility act",
        "Does it cover e-books sold through our website",
        "Who supervises compliance in Germany",
        "Can you explain what an accessibility statement is",
        "Thanks for the overview of the timeline for banking apps",
    ];

    let first = harness.turn(None, turns[0]).await;
    let session_id = first.metadata.session_id.clone();
    for question in &turns[1..] {
        harness.turn(Some(&session_id), question).await;
    }

    let records = harness.storage.recent_frustration_records("u1", 10).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| !r.should_escalate));
    assert!(harness.notices().is_empty());
}

#[tokio::test]
async fn test_repeated_question_gets_clarifying_reply() {
    let harness = Harness::new(OrchestratorConfig::default());

    let first = harness.turn(None, "What is the EAA?").await;
    assert_eq!(first.answer, ANSWER);

    let second = harness
        .turn(Some(&first.metadata.session_id), "What's the EAA??")
        .await;
    assert!(second.answer.contains("It looks like you asked this already"));
    assert_eq!(harness.model.answer_prompts().len(), 1);
}

#[tokio::test]
async fn test_turn_is_stored_user_then_assistant() {
    let harness = Harness::new(OrchestratorConfig::default());
    let response = harness.turn(None, "Which products are covered").await;

    let messages = harness
        .storage
        .list_messages(&response.metadata.session_id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Which products are covered");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, ANSWER);
    assert!(messages[0].created_at <= messages[1].created_at);
}

#[tokio::test]
async fn test_first_turn_prompt_has_only_an_empty_transcript() {
    let harness = Harness::new(OrchestratorConfig::default());
    harness.turn(None, "Which products are covered").await;

    let prompts = harness.model.answer_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("## Current conversation"));
    assert!(prompts[0].contains("(no earlier messages in this conversation)"));
    assert!(!prompts[0].contains("## Business profile"));
    assert!(!prompts[0].contains("## Related earlier questions"));
}

#[tokio::test]
async fn test_business_details_are_captured_before_answering() {
    let harness = Harness::new(OrchestratorConfig::default());

    let intro = harness
        .turn(None, "We are an online shop with 40 employees.")
        .await;
    assert_eq!(intro.answer, ANSWER);

    let prompts = harness.model.answer_prompts();
    assert_eq!(prompts.len(), 1);
    let profile = prompts[0].find("## Business profile").unwrap();
    let transcript = prompts[0].find("## Current conversation").unwrap();
    assert!(profile < transcript);
    assert!(prompts[0][profile..transcript].contains("online shop"));

    let facts = harness.storage.list_facts("u1").await.unwrap();
    assert_eq!(facts.len(), 2);
    assert!(facts
        .iter()
        .any(|f| f.fact_type == "business_type" && f.fact_value == "online shop"));

    harness
        .turn(Some(&intro.metadata.session_id), "Which deadlines apply to us")
        .await;
    let prompts = harness.model.answer_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("## Business profile"));
    assert!(prompts[1].contains("40 employees"));
}

#[tokio::test]
async fn test_long_session_escalates_once_at_the_message_threshold() {
    let config = OrchestratorConfig {
        escalation_threshold: 4,
        ..OrchestratorConfig::default()
    };
    let harness = Harness::new(config);

    let first = harness.turn(None, "Which products are covered").await;
    let session_id = first.metadata.session_id.clone();
    assert!(harness.notices().is_empty());

    harness.turn(Some(&session_id), "Who supervises compliance in Germany").await;
    harness
        .turn(Some(&session_id), "Can you explain what an accessibility statement is")
        .await;

    let notices = harness.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].user_id, "u1");
    assert_eq!(notices[0].reason, EscalationReason::MessageCount { count: 4 });
}
