//! Per-request user profile derived from facts and message history.

use serde::Serialize;

use crate::database::{FrustrationRecord, Message, Role, UserFact};
use crate::utils::text::count_matches;

const HIGH_FRUSTRATION: f32 = 0.6;

const PERSONA_KEYWORDS: &[(Persona, &[&str])] = &[
    (
        Persona::Developer,
        &["developer", "engineer", "programmer", "frontend", "backend", "aria", "html", "code", "entwickler"],
    ),
    (
        Persona::Designer,
        &["designer", "ux", "ui ", "contrast", "color", "colour", "figma", "gestalt"],
    ),
    (
        Persona::ComplianceOfficer,
        &["compliance", "legal", "lawyer", "data protection", "jurist", "rechtsabteilung", "datenschutz"],
    ),
    (
        Persona::Manager,
        &["manager", "project lead", "product owner", "team lead", "budget", "roadmap", "projektleiter", "leitung"],
    ),
    (
        Persona::BusinessOwner,
        &["owner", "founder", "ceo", "my company", "my shop", "inhaber", "gründer", "geschäftsführer"],
    ),
];

const NEED_KEYWORDS: &[(Need, &[&str])] = &[
    (Need::Deadlines, &["deadline", "when", "2025", "2030", "frist", "wann", "stichtag"]),
    (
        Need::TechnicalGuidance,
        &["wcag", "en 301 549", "screen reader", "alt text", "keyboard", "contrast", "implement", "technisch", "barrierefrei"],
    ),
    (
        Need::Documentation,
        &["statement", "document", "declaration", "erklärung", "dokumentation", "nachweis"],
    ),
    (Need::Audit, &["audit", "test", "check", "assessment", "prüfung", "prüfen"]),
    (Need::Penalties, &["penalt", "fine", "sanction", "enforce", "bußgeld", "strafe", "sanktion"]),
    (
        Need::Exemptions,
        &["exempt", "microenterprise", "micro-enterprise", "disproportionate", "ausnahme", "kleinstunternehmen", "unverhältnismäßig"],
    ),
];

// Signals that the organization has already started the work.
const PROGRESS_KEYWORDS: &[&str] = &[
    "we already", "we have implemented", "our audit", "our statement", "we tested", "remediat",
    "wir haben bereits", "schon umgesetzt", "unsere erklärung",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Developer,
    Designer,
    Manager,
    ComplianceOfficer,
    BusinessOwner,
    General,
}

impl Persona {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Designer => "designer",
            Self::Manager => "manager",
            Self::ComplianceOfficer => "compliance_officer",
            Self::BusinessOwner => "business_owner",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    Unknown,
    Starter,
    Growing,
    Established,
}

impl Maturity {
    fn from_size(employees: u32) -> Self {
        match employees {
            0..=9 => Self::Starter,
            10..=249 => Self::Growing,
            _ => Self::Established,
        }
    }

    fn base_readiness(&self) -> f32 {
        match self {
            Self::Unknown => 0.2,
            Self::Starter => 0.3,
            Self::Growing => 0.5,
            Self::Established => 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Exploration,
    DeepDive,
    Implementation,
}

impl Stage {
    pub fn from_message_count(count: usize) -> Self {
        match count {
            0..=2 => Self::Discovery,
            3..=6 => Self::Exploration,
            7..=12 => Self::DeepDive,
            _ => Self::Implementation,
        }
    }

    /// 0 at discovery, 1 at implementation.
    pub fn progress(&self) -> f32 {
        match self {
            Self::Discovery => 0.0,
            Self::Exploration => 1.0 / 3.0,
            Self::DeepDive => 2.0 / 3.0,
            Self::Implementation => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Need {
    Deadlines,
    TechnicalGuidance,
    Documentation,
    Audit,
    Penalties,
    Exemptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrustrationProfile {
    pub average: f32,
    pub latest: f32,
    pub high: bool,
}

impl FrustrationProfile {
    /// `records` newest first.
    pub fn from_records(records: &[FrustrationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let average =
            records.iter().map(|r| r.frustration_level).sum::<f32>() / records.len() as f32;
        let latest = records[0].frustration_level;
        Self {
            average,
            latest,
            high: latest >= HIGH_FRUSTRATION || records.iter().any(|r| r.should_escalate),
        }
    }
}

/// Ephemeral profile; only its aggregates are ever logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionContext {
    pub persona: Persona,
    pub maturity: Maturity,
    pub readiness: f32,
    pub frustration: FrustrationProfile,
    pub stage: Stage,
    pub needs: Vec<Need>,
    pub session_message_count: usize,
    pub has_business_profile: bool,
}

fn fact<'a>(facts: &'a [UserFact], fact_type: &str) -> Option<&'a UserFact> {
    facts.iter().find(|f| f.fact_type == fact_type)
}

fn first_number(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn user_text(session: &[Message], history: &[Message], question: &str) -> String {
    let mut text = session
        .iter()
        .chain(history.iter())
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    text.push(' ');
    text.push_str(&question.to_lowercase());
    text
}

fn detect_persona(facts: &[UserFact], text: &str) -> Persona {
    let role = fact(facts, "role").map(|f| f.fact_value.to_lowercase());

    // A stated role outranks message vocabulary.
    if let Some(role) = role.as_deref() {
        for (persona, keywords) in PERSONA_KEYWORDS {
            if count_matches(role, keywords) > 0 {
                return *persona;
            }
        }
    }

    PERSONA_KEYWORDS
        .iter()
        .map(|(persona, keywords)| (*persona, count_matches(text, keywords)))
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
        .map(|(persona, _)| persona)
        .unwrap_or_else(|| {
            if facts.iter().any(UserFact::is_business) {
                Persona::BusinessOwner
            } else {
                Persona::General
            }
        })
}

fn detect_maturity(facts: &[UserFact], text: &str) -> (Maturity, f32) {
    let business_facts = facts.iter().filter(|f| f.is_business()).count();
    let maturity = match fact(facts, "business_size").and_then(|f| first_number(&f.fact_value)) {
        Some(employees) => Maturity::from_size(employees),
        None if business_facts >= 3 => Maturity::Growing,
        None if business_facts > 0 => Maturity::Starter,
        None => Maturity::Unknown,
    };

    let progress_hits = count_matches(text, PROGRESS_KEYWORDS) as f32;
    let readiness = maturity.base_readiness()
        + (business_facts.min(4) as f32) * 0.05
        + (progress_hits * 0.1).min(0.2);
    (maturity, readiness.clamp(0.0, 1.0))
}

fn predict_needs(text: &str) -> Vec<Need> {
    let mut scored: Vec<(Need, usize)> = NEED_KEYWORDS
        .iter()
        .map(|(need, keywords)| (*need, count_matches(text, keywords)))
        .filter(|(_, hits)| *hits > 0)
        .collect();
    // Stable sort keeps declaration order among ties.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(need, _)| need).collect()
}

impl SuggestionContext {
    pub fn derive(
        facts: &[UserFact],
        session_messages: &[Message],
        history: &[Message],
        frustration: &[FrustrationRecord],
        question: &str,
    ) -> Self {
        let text = user_text(session_messages, history, question);
        let (maturity, readiness) = detect_maturity(facts, &text);

        Self {
            persona: detect_persona(facts, &text),
            maturity,
            readiness,
            frustration: FrustrationProfile::from_records(frustration),
            stage: Stage::from_message_count(session_messages.len()),
            needs: predict_needs(&text),
            session_message_count: session_messages.len(),
            has_business_profile: facts.iter().any(UserFact::is_business),
        }
    }
}
