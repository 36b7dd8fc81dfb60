//! Conversation memory
//!
//! Provides persistent conversation state on top of [`Storage`](crate::database::Storage):
//! - Sessions and the append-only message log
//! - Durable per-user facts
//! - Prompt context assembly and session summaries

mod context_assembler;
mod fact_store;
mod message_store;
mod session_store;
mod summary;
pub mod types;

pub use context_assembler::ContextAssembler;
pub use fact_store::{mentions_business, FactStore};
pub use message_store::MessageStore;
pub use session_store::{is_valid_session_id, SessionStore};
pub use summary::{ConversationSummarizer, MIN_MESSAGES_FOR_SUMMARY};
pub use types::{
    ContextFactors, ConversationSummary, FrustrationAnalysis, Language, RequestContext,
    ResolvedSession,
};
