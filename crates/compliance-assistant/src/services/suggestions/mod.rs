//! Adaptive follow-up suggestions
//!
//! Builds a per-request profile (persona, business maturity, frustration,
//! conversation stage, predicted needs), applies the suggestion rules and
//! returns the best-ranked prompts in the reply language.

mod profile;
mod rules;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::Storage;
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::services::conversation::{FactStore, MessageStore, RequestContext};
use crate::utils::CoreResult;

pub use profile::{FrustrationProfile, Maturity, Need, Persona, Stage, SuggestionContext};
pub use rules::MAX_SUGGESTIONS;

const HISTORY_WINDOW: usize = 50;
const FRUSTRATION_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub text: String,
    pub category: String,
    pub score: f32,
}

/// Aggregates logged for every generated set.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SuggestionAnalytics {
    pub persona: Option<Persona>,
    pub maturity: Option<Maturity>,
    pub stage: Option<Stage>,
    pub readiness: f32,
    pub frustration_average: f32,
    pub candidate_count: usize,
    pub returned: usize,
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SuggestionSet {
    pub suggestions: Vec<Suggestion>,
    pub header: String,
    pub analytics: SuggestionAnalytics,
}

#[derive(Clone)]
pub struct SuggestionEngine {
    storage: Arc<dyn Storage>,
    facts: FactStore,
    messages: MessageStore,
    logger: ActivityLogger,
}

impl SuggestionEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        facts: FactStore,
        messages: MessageStore,
        logger: ActivityLogger,
    ) -> Self {
        Self {
            storage,
            facts,
            messages,
            logger,
        }
    }

    /// Never fails: any upstream error yields the fixed fallback set.
    pub async fn generate(&self, request: &RequestContext, question: &str) -> SuggestionSet {
        let set = match self.profile(request, question).await {
            Ok(ctx) => Self::from_profile(&ctx, request, question),
            Err(e) => {
                warn!(
                    "Suggestion profile for session {} unavailable: {}",
                    request.session_id, e
                );
                Self::fallback_set(request)
            }
        };

        debug!(
            "Generated {} suggestions for session {} (fallback: {})",
            set.suggestions.len(),
            request.session_id,
            set.analytics.fallback
        );
        self.logger.log(
            ActivityLog::builder(
                &request.session_id,
                &request.user_id,
                ActivityType::SuggestionsGenerated,
            )
            .custom(
                "analytics",
                serde_json::to_value(&set.analytics).unwrap_or_default(),
            )
            .build(),
        );
        set
    }

    async fn profile(&self, request: &RequestContext, question: &str) -> CoreResult<SuggestionContext> {
        let (facts, session, history, frustration) = tokio::join!(
            self.facts.list_for_user(&request.user_id),
            self.messages.list_for_session(&request.session_id),
            self.messages.recent_for_user(&request.user_id, HISTORY_WINDOW),
            self.storage
                .recent_frustration_records(&request.user_id, FRUSTRATION_WINDOW),
        );

        Ok(SuggestionContext::derive(
            &facts?,
            &session?,
            &history?,
            &frustration?,
            question,
        ))
    }

    fn from_profile(ctx: &SuggestionContext, request: &RequestContext, question: &str) -> SuggestionSet {
        let candidates = rules::candidates(ctx, request.language);
        let candidate_count = candidates.len();
        let ranked = rules::rank(candidates, question, rules::opportunity(ctx));

        let suggestions: Vec<Suggestion> = ranked
            .into_iter()
            .map(|(candidate, score)| Suggestion {
                text: candidate.text,
                category: candidate.category.to_string(),
                score,
            })
            .collect();

        SuggestionSet {
            header: rules::header(Some(ctx), request.language),
            analytics: SuggestionAnalytics {
                persona: Some(ctx.persona),
                maturity: Some(ctx.maturity),
                stage: Some(ctx.stage),
                readiness: ctx.readiness,
                frustration_average: ctx.frustration.average,
                candidate_count,
                returned: suggestions.len(),
                fallback: false,
            },
            suggestions,
        }
    }

    fn fallback_set(request: &RequestContext) -> SuggestionSet {
        let suggestions: Vec<Suggestion> = rules::fallback(request.language)
            .into_iter()
            .map(|text| Suggestion {
                text,
                category: "fallback".to_string(),
                score: 0.0,
            })
            .collect();

        SuggestionSet {
            header: rules::header(None, request.language),
            analytics: SuggestionAnalytics {
                persona: None,
                maturity: None,
                stage: None,
                readiness: 0.0,
                frustration_average: 0.0,
                candidate_count: 0,
                returned: suggestions.len(),
                fallback: true,
            },
            suggestions,
        }
    }
}
