use std::cmp::Ordering;

use super::profile::{Maturity, Need, Persona, Stage, SuggestionContext};
use crate::services::conversation::Language;
use crate::utils::text::{jaccard, normalize, word_set};

pub const MAX_SUGGESTIONS: usize = 5;

const DUPLICATE_THRESHOLD: f32 = 0.6;

const TIER_QUICK_FIX: f32 = 1.0;
const TIER_NEED: f32 = 0.8;
const TIER_PERSONA: f32 = 0.6;
const TIER_STAGE: f32 = 0.5;

/// One rule output before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub category: &'static str,
    pub tier: f32,
    pub value: f32,
}

impl Candidate {
    fn new(text: &str, category: &'static str, tier: f32, value: f32) -> Self {
        Self {
            text: text.to_string(),
            category,
            tier,
            value,
        }
    }

    pub fn score(&self, opportunity: f32) -> f32 {
        0.5 * self.tier + 0.3 * self.value + 0.2 * opportunity
    }
}

pub fn opportunity(ctx: &SuggestionContext) -> f32 {
    0.4 * ctx.readiness + 0.4 * (1.0 - ctx.frustration.average) + 0.2 * ctx.stage.progress()
}

fn need_text(need: Need, lang: Language) -> &'static str {
    match need {
        Need::Deadlines => lang.pick(
            "What are the exact deadlines for my products and services?",
            "Welche Fristen gelten genau für meine Produkte und Dienstleistungen?",
        ),
        Need::TechnicalGuidance => lang.pick(
            "Which WCAG criteria should we tackle first?",
            "Welche WCAG-Kriterien sollten wir zuerst angehen?",
        ),
        Need::Documentation => lang.pick(
            "What must an accessibility statement contain?",
            "Was muss eine Barrierefreiheitserklärung enthalten?",
        ),
        Need::Audit => lang.pick(
            "How do we prepare for an accessibility audit?",
            "Wie bereiten wir uns auf eine Barrierefreiheitsprüfung vor?",
        ),
        Need::Penalties => lang.pick(
            "What penalties apply if we miss the deadline?",
            "Welche Sanktionen drohen, wenn wir die Frist verpassen?",
        ),
        Need::Exemptions => lang.pick(
            "Does the microenterprise exemption apply to us?",
            "Gilt die Ausnahme für Kleinstunternehmen für uns?",
        ),
    }
}

fn need_value(need: Need, maturity: Maturity) -> f32 {
    match need {
        Need::Deadlines => 0.9,
        Need::TechnicalGuidance | Need::Audit => 0.8,
        Need::Documentation | Need::Penalties => 0.7,
        Need::Exemptions if matches!(maturity, Maturity::Starter | Maturity::Unknown) => 0.9,
        Need::Exemptions => 0.4,
    }
}

fn persona_text(persona: Persona, lang: Language) -> &'static str {
    match persona {
        Persona::Developer => lang.pick(
            "How do I test our site with a screen reader?",
            "Wie teste ich unsere Website mit einem Screenreader?",
        ),
        Persona::Designer => lang.pick(
            "Which colour contrast ratios are required?",
            "Welche Farbkontraste sind vorgeschrieben?",
        ),
        Persona::Manager => lang.pick(
            "How should we plan budget and timeline for compliance?",
            "Wie planen wir Budget und Zeitplan für die Umsetzung?",
        ),
        Persona::ComplianceOfficer => lang.pick(
            "Which records must we keep to prove conformity?",
            "Welche Nachweise müssen wir zur Konformität aufbewahren?",
        ),
        Persona::BusinessOwner => lang.pick(
            "Does the European Accessibility Act apply to my business?",
            "Gilt der European Accessibility Act für mein Unternehmen?",
        ),
        Persona::General => lang.pick(
            "Who does the European Accessibility Act apply to?",
            "Für wen gilt der European Accessibility Act?",
        ),
    }
}

fn stage_text(stage: Stage, lang: Language) -> &'static str {
    match stage {
        Stage::Discovery => lang.pick(
            "What is the European Accessibility Act in a nutshell?",
            "Was ist der European Accessibility Act in Kürze?",
        ),
        Stage::Exploration => lang.pick(
            "Which of my products and services are covered?",
            "Welche meiner Produkte und Dienstleistungen sind betroffen?",
        ),
        Stage::DeepDive => lang.pick(
            "Can you give me a step-by-step compliance checklist?",
            "Können Sie mir eine Schritt-für-Schritt-Checkliste geben?",
        ),
        Stage::Implementation => lang.pick(
            "How do we stay compliant after launch?",
            "Wie bleiben wir nach dem Start dauerhaft konform?",
        ),
    }
}

/// Apply every rule to the profile.
pub fn candidates(ctx: &SuggestionContext, lang: Language) -> Vec<Candidate> {
    let mut out = Vec::new();

    if ctx.frustration.high {
        out.push(Candidate::new(
            lang.pick(
                "What is the single most important step for me right now?",
                "Was ist jetzt der wichtigste nächste Schritt für mich?",
            ),
            "quick_fix",
            TIER_QUICK_FIX,
            1.0,
        ));
    }

    for need in &ctx.needs {
        out.push(Candidate::new(
            need_text(*need, lang),
            "need",
            TIER_NEED,
            need_value(*need, ctx.maturity),
        ));
    }

    out.push(Candidate::new(
        persona_text(ctx.persona, lang),
        "persona",
        TIER_PERSONA,
        0.6,
    ));

    if !ctx.has_business_profile {
        out.push(Candidate::new(
            lang.pick(
                "Here is some information about my business, what applies to us?",
                "Hier sind Infos zu meinem Unternehmen, was gilt für uns?",
            ),
            "profile",
            TIER_PERSONA,
            0.7,
        ));
    }

    out.push(Candidate::new(stage_text(ctx.stage, lang), "stage", TIER_STAGE, 0.5));
    out
}

fn is_duplicate(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let words_a = word_set(&a);
    let words_b = word_set(&b);
    words_a.is_subset(&words_b)
        || words_b.is_subset(&words_a)
        || jaccard(&a, &b) >= DUPLICATE_THRESHOLD
}

/// Score, drop near-duplicates of the question and of better-ranked
/// candidates, and keep the top [`MAX_SUGGESTIONS`].
pub fn rank(candidates: Vec<Candidate>, question: &str, opportunity: f32) -> Vec<(Candidate, f32)> {
    let mut scored: Vec<(Candidate, f32)> = candidates
        .into_iter()
        .filter(|c| !is_duplicate(&c.text, question))
        .map(|c| {
            let score = c.score(opportunity);
            (c, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut kept: Vec<(Candidate, f32)> = Vec::with_capacity(MAX_SUGGESTIONS);
    for (candidate, score) in scored {
        if kept.iter().any(|(k, _)| is_duplicate(&k.text, &candidate.text)) {
            continue;
        }
        kept.push((candidate, score));
        if kept.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    kept
}

/// Fixed set used whenever the profile cannot be built.
pub fn fallback(lang: Language) -> Vec<String> {
    [
        (
            "What is the European Accessibility Act?",
            "Was ist der European Accessibility Act?",
        ),
        (
            "Which products and services are covered?",
            "Welche Produkte und Dienstleistungen sind betroffen?",
        ),
        (
            "What are the key deadlines?",
            "Welche Fristen sind wichtig?",
        ),
    ]
    .iter()
    .map(|(en, de)| lang.pick(en, de).to_string())
    .collect()
}

pub fn header(ctx: Option<&SuggestionContext>, lang: Language) -> String {
    let text = if ctx.is_some_and(|c| c.frustration.high) {
        lang.pick("Let's get you to an answer quickly:", "Schnell zur Antwort:")
    } else {
        lang.pick("You might also want to ask:", "Das könnte Sie auch interessieren:")
    };
    text.to_string()
}
