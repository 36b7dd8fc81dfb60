pub mod background;
pub mod classifier;
pub mod conversation;
pub mod embedding_service;
pub mod frustration;
pub mod language_model;
pub mod llm_service;
pub mod notifier;
pub mod orchestrator;
pub mod suggestions;

pub use background::{spawn_workers, BackgroundJob, BackgroundProcessor, BackgroundQueue};
pub use classifier::{RequestClassifier, Route};
pub use embedding_service::EmbeddingService;
pub use frustration::FrustrationScorer;
pub use language_model::{CompletionOptions, LanguageModel, ModelError};
pub use llm_service::LlmService;
pub use notifier::{LogNotifier, Notifier, SmtpNotifier};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use suggestions::SuggestionEngine;
