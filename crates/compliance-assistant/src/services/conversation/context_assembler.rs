use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::fact_store::FactStore;
use super::message_store::MessageStore;
use super::types::{Language, RequestContext};
use crate::config::ConversationConfig;
use crate::database::{Message, Role, UserFact};
use crate::services::language_model::LanguageModel;
use crate::utils::text::preview;
use crate::utils::token_estimator::estimate_tokens;

/// Domain guidance keyed by business-type keywords: (keywords, english, german).
const DOMAIN_GUIDANCE: &[(&[&str], &str, &str)] = &[
    (
        &["transport", "rail", "train", "bus", "airline", "ferry", "ticket", "verkehr", "bahn"],
        "Passenger transport: focus on ticketing systems, booking websites and apps, and real-time travel information.",
        "Personenverkehr: Ticketsysteme, Buchungswebsites und -apps sowie Echtzeit-Reiseinformationen beachten.",
    ),
    (
        &["bank", "finance", "financial", "payment", "credit", "insurance", "versicherung"],
        "Banking services: focus on e-banking portals, payment terminals and ATMs.",
        "Bankdienstleistungen: E-Banking-Portale, Zahlungsterminals und Geldautomaten beachten.",
    ),
    (
        &["retail", "e-commerce", "ecommerce", "shop", "store", "handel"],
        "E-commerce: focus on the online shop checkout, product information and payment flow.",
        "E-Commerce: Checkout im Onlineshop, Produktinformationen und Zahlungsablauf beachten.",
    ),
    (
        &["telecom", "telco", "mobile operator", "internet provider", "telekommunikation"],
        "Electronic communication services: focus on communication services and emergency communication.",
        "Elektronische Kommunikationsdienste: Kommunikationsdienste und Notrufkommunikation beachten.",
    ),
    (
        &["media", "publish", "e-book", "ebook", "verlag", "news"],
        "Publishing: focus on e-books, reading software and digital publications.",
        "Verlagswesen: E-Books, Lesesoftware und digitale Publikationen beachten.",
    ),
];

struct Headings {
    profile: &'static str,
    known_facts: &'static str,
    transcript: &'static str,
    empty_transcript: &'static str,
    similar: &'static str,
    guidance: &'static str,
    user: &'static str,
    assistant: &'static str,
}

fn headings(language: Language) -> Headings {
    match language {
        Language::English => Headings {
            profile: "## Business profile",
            known_facts: "## Known about the user",
            transcript: "## Current conversation",
            empty_transcript: "(no earlier messages in this conversation)",
            similar: "## Related earlier questions",
            guidance: "Focus areas",
            user: "User",
            assistant: "Assistant",
        },
        Language::German => Headings {
            profile: "## Unternehmensprofil",
            known_facts: "## Bekannt über den Nutzer",
            transcript: "## Aktuelles Gespräch",
            empty_transcript: "(noch keine früheren Nachrichten in diesem Gespräch)",
            similar: "## Frühere ähnliche Fragen",
            guidance: "Schwerpunkte",
            user: "Nutzer",
            assistant: "Assistent",
        },
    }
}

fn humanize(fact_type: &str) -> String {
    let label = fact_type.strip_prefix("business_").unwrap_or(fact_type).replace('_', " ");
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => label,
    }
}

/// Combines facts, the current transcript and similar history into one prompt context.
#[derive(Clone)]
pub struct ContextAssembler {
    messages: MessageStore,
    facts: FactStore,
    model: Arc<dyn LanguageModel>,
    config: ConversationConfig,
}

impl ContextAssembler {
    pub fn new(
        messages: MessageStore,
        facts: FactStore,
        model: Arc<dyn LanguageModel>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            messages,
            facts,
            model,
            config,
        }
    }

    pub fn default_base_instruction(language: Language) -> String {
        format!(
            r#"You are a compliance assistant helping organizations understand accessibility regulation such as the European Accessibility Act (EAA).

Guidelines:
- Base your answer on the provided reference context and say clearly when it does not cover the question
- Tailor the answer to the business profile when one is given
- Be concise, practical and professional
- Do not give binding legal advice; recommend expert review for edge cases
- Answer in {}"#,
            language.name()
        )
    }

    /// Never fails and never returns an empty string; unavailable pieces are left out.
    pub async fn build_context(&self, request: &RequestContext, current_query: &str) -> String {
        let (recent, similar, facts) = tokio::join!(
            self.messages
                .recent(&request.session_id, self.config.recent_messages_limit),
            self.similar_history(&request.user_id, current_query),
            self.facts.list_for_user(&request.user_id),
        );

        let recent = recent.unwrap_or_else(|e| {
            warn!("Transcript unavailable for {}: {}", request.session_id, e);
            Vec::new()
        });
        let facts = facts.unwrap_or_else(|e| {
            warn!("Facts unavailable for {}: {}", request.user_id, e);
            Vec::new()
        });

        let shown: HashSet<Uuid> = recent.iter().map(|m| m.id).collect();
        let mut similar: Vec<(Message, f32)> = similar
            .into_iter()
            .filter(|(m, _)| !shown.contains(&m.id))
            .collect();

        let h = headings(request.language);
        let profile = self.render_profile(&facts, request.language, &h);
        let mut transcript: Vec<String> = recent
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::User => h.user,
                    Role::Assistant => h.assistant,
                };
                format!("{}: {}", speaker, m.content)
            })
            .collect();

        let render = |transcript: &[String], similar: &[(Message, f32)]| -> String {
            let mut sections: Vec<String> = Vec::new();
            if let Some(profile) = &profile {
                sections.push(profile.clone());
            }

            let body = if transcript.is_empty() {
                h.empty_transcript.to_string()
            } else {
                transcript.join("\n")
            };
            sections.push(format!("{}\n{}", h.transcript, body));

            if !similar.is_empty() {
                let lines: Vec<String> = similar
                    .iter()
                    .map(|(m, sim)| format!("- ({:.2}) {}", sim, preview(&m.content, 300)))
                    .collect();
                sections.push(format!("{}\n{}", h.similar, lines.join("\n")));
            }
            sections.join("\n\n")
        };

        let mut context = render(&transcript, &similar);
        while estimate_tokens(&context) > self.config.max_context_tokens {
            if let Some(oldest) = similar
                .iter()
                .enumerate()
                .min_by_key(|(_, (m, _))| m.created_at)
                .map(|(i, _)| i)
            {
                similar.remove(oldest);
            } else if transcript.len() > 1 {
                transcript.remove(0);
            } else {
                break;
            }
            context = render(&transcript, &similar);
        }

        debug!(
            "Assembled context: {} transcript lines, {} similar, ~{} tokens",
            transcript.len(),
            similar.len(),
            estimate_tokens(&context)
        );
        context
    }

    async fn similar_history(&self, user_id: &str, query: &str) -> Vec<(Message, f32)> {
        let vector = match self.model.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping similar history, embedding failed: {}", e);
                return Vec::new();
            }
        };

        self.messages
            .find_similar(
                &vector,
                user_id,
                self.config.similar_messages_limit,
                self.config.similar_min_similarity,
            )
            .await
            .unwrap_or_else(|e| {
                warn!("Similar history unavailable: {}", e);
                Vec::new()
            })
    }

    fn render_profile(&self, facts: &[UserFact], language: Language, h: &Headings) -> Option<String> {
        let confident: Vec<&UserFact> = facts
            .iter()
            .filter(|f| f.confidence > self.config.high_confidence_fact)
            .collect();

        let business: Vec<&UserFact> = confident.iter().copied().filter(|f| f.is_business()).collect();

        if !business.is_empty() {
            let mut block = vec![h.profile.to_string()];
            block.extend(
                business
                    .iter()
                    .map(|f| format!("- {}: {}", humanize(&f.fact_type), f.fact_value)),
            );

            let business_type = business
                .iter()
                .find(|f| f.fact_type == "business_type" || f.fact_type == "business_sector")
                .map(|f| f.fact_value.to_lowercase());
            if let Some(kind) = business_type {
                let guidance: Vec<&str> = DOMAIN_GUIDANCE
                    .iter()
                    .filter(|(keywords, _, _)| keywords.iter().any(|k| kind.contains(k)))
                    .map(|(_, en, de)| language.pick(en, de))
                    .collect();
                if !guidance.is_empty() {
                    block.push(format!("{}: {}", h.guidance, guidance.join(" ")));
                }
            }
            return Some(block.join("\n"));
        }

        if confident.is_empty() {
            return None;
        }

        let mut block = vec![h.known_facts.to_string()];
        block.extend(
            confident
                .iter()
                .map(|f| format!("- {}: {}", humanize(&f.fact_type), f.fact_value)),
        );
        Some(block.join("\n"))
    }
}
