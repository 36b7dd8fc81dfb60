//! Request classifier
//! Decides how an incoming message is routed: canned reply, clarification,
//! business-info capture ahead of retrieval, multi-question split or the
//! single-question RAG flow.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::services::conversation::{mentions_business, Language};
use crate::services::language_model::LanguageModel;
use crate::utils::text::{jaccard, normalize};

const SHORT_MESSAGE_MAX_CHARS: usize = 8;
const REASK_MIN_CHARS: usize = 5;
const REASK_MIN_RATIO: f32 = 0.7;

static NEGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(no+|nope|nah|nein|nee|nö|not now|never|hmm+|meh|ugh|oh|ah|ok|okay|k)$")
        .expect("negation regex is valid")
});

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(hi|hello|hey|hiya|good (morning|afternoon|evening)|hallo|servus|moin|guten (morgen|tag|abend))( there| everyone| zusammen)?$")
        .expect("greeting regex is valid")
});

static THANKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(thanks|thank you|thx|cheers|danke|danke schön|vielen dank)( (a lot|so much|very much|sehr|dir|ihnen))?$")
        .expect("thanks regex is valid")
});

const IDENTITY_PHRASES: &[&str] = &[
    "who are you",
    "what are you",
    "what can you do",
    "are you a bot",
    "are you human",
    "wer bist du",
    "was bist du",
    "was kannst du",
    "wer sind sie",
];

const SELF_DESCRIPTION_OPENERS: &[&str] = &[
    "we are",
    "we run",
    "we sell",
    "we operate",
    "we provide",
    "our company",
    "our business",
    "my company",
    "i work",
    "i run",
    "i am a",
    "i am the",
    "wir sind",
    "wir betreiben",
    "wir verkaufen",
    "unser unternehmen",
    "unsere firma",
    "ich arbeite",
    "ich bin",
];

const INTERROGATIVES: &[&str] = &[
    "what", "which", "who", "when", "where", "why", "how", "does", "do", "is", "are", "can",
    "must", "should", "was", "welche", "welcher", "wer", "wann", "wo", "warum", "wie", "muss",
    "gilt", "kann", "sind", "ist",
];

const CONJUNCTIONS: &[&str] = &["and", "also", "or", "plus", "und", "sowie", "oder", "außerdem"];

const IMPERATIVES: &[&str] = &[
    "tell", "explain", "list", "describe", "show", "give", "outline", "clarify", "summarize",
    "compare", "nenne", "nennen", "erkläre", "erklären", "beschreibe", "zeige", "sag", "sagen",
];

// Skipped when looking for the word a sentence opens with.
const LEAD_FILLERS: &[&str] = &[
    "also", "and", "then", "now", "please", "so", "und", "außerdem", "bitte", "dann", "noch",
];

// Wh-words only; auxiliaries like "is" or "do" appear in most single questions.
const QUESTION_WORDS: &[&str] = &[
    "what", "which", "who", "when", "where", "why", "how", "welche", "welcher", "welches", "wer",
    "wann", "wo", "warum", "wie", "wozu",
];

const MIN_SENTENCE_WORDS: usize = 2;
const DENSITY_MIN_HITS: usize = 2;
const DENSITY_THRESHOLD: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmallTalk {
    Greeting,
    Thanks,
    Identity,
}

/// Mutually exclusive routes for one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ShortNegation,
    Reask { previous: String },
    Simple(SmallTalk),
    BusinessInfo,
    Multiple(Vec<String>),
    Single,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ShortNegation => "short_negation",
            Self::Reask { .. } => "reask",
            Self::Simple(_) => "simple",
            Self::BusinessInfo => "business_info",
            Self::Multiple(_) => "multiple",
            Self::Single => "single",
        }
    }

    /// Fixed reply for routes that skip retrieval.
    pub fn canned_reply(&self, language: Language) -> Option<String> {
        let text = match self {
            Self::ShortNegation => language.pick(
                "No problem. If another question about accessibility requirements comes up, just ask.",
                "Kein Problem. Wenn Sie noch eine Frage zu Barrierefreiheitsanforderungen haben, fragen Sie einfach.",
            ),
            Self::Reask { .. } => language.pick(
                "It looks like you asked this already. Which part of my previous answer was unclear? Tell me what is missing and I will go into more detail.",
                "Diese Frage kam gerade schon. Welcher Teil meiner letzten Antwort war unklar? Sagen Sie mir, was fehlt, dann gehe ich genauer darauf ein.",
            ),
            Self::Simple(SmallTalk::Greeting) => language.pick(
                "Hello! I can help you understand accessibility regulation such as the European Accessibility Act. What would you like to know?",
                "Hallo! Ich helfe Ihnen, Barrierefreiheitsvorgaben wie den European Accessibility Act zu verstehen. Was möchten Sie wissen?",
            ),
            Self::Simple(SmallTalk::Thanks) => language.pick(
                "You're welcome! Let me know if anything else comes up.",
                "Gern geschehen! Melden Sie sich, wenn noch etwas offen ist.",
            ),
            Self::Simple(SmallTalk::Identity) => language.pick(
                "I am a compliance assistant. I answer questions about accessibility requirements using reference material and can tailor the answer to your organization.",
                "Ich bin ein Compliance-Assistent. Ich beantworte Fragen zu Barrierefreiheitsanforderungen auf Basis von Referenzmaterial und gehe dabei auf Ihr Unternehmen ein.",
            ),
            Self::BusinessInfo | Self::Multiple(_) | Self::Single => return None,
        };
        Some(text.to_string())
    }
}

/// Trim and collapse internal whitespace.
pub fn preprocess(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_short_negation(message: &str) -> bool {
    let normalized = normalize(message);
    normalized.chars().count() <= SHORT_MESSAGE_MAX_CHARS && NEGATION.is_match(&normalized)
}

/// Same question again, ignoring case, contractions and punctuation.
pub fn is_reask(current: &str, previous: &str) -> bool {
    let current = normalize(current);
    let previous = normalize(previous);
    if current.chars().count() < REASK_MIN_CHARS || previous.chars().count() < REASK_MIN_CHARS {
        return false;
    }
    let ratio = jaccard(&current, &previous);
    debug!("Reask ratio {:.2}", ratio);
    ratio >= REASK_MIN_RATIO
}

pub fn classify_small_talk(message: &str) -> Option<SmallTalk> {
    let normalized = normalize(message);
    if GREETING.is_match(&normalized) {
        Some(SmallTalk::Greeting)
    } else if THANKS.is_match(&normalized) {
        Some(SmallTalk::Thanks)
    } else if IDENTITY_PHRASES.iter().any(|p| normalized.contains(p)) {
        Some(SmallTalk::Identity)
    } else {
        None
    }
}

/// A statement (not a question) in which the user describes their organization.
pub fn is_business_info(message: &str) -> bool {
    if message.contains('?') {
        return false;
    }
    let normalized = normalize(message);
    SELF_DESCRIPTION_OPENERS
        .iter()
        .any(|opener| normalized.starts_with(opener))
        && mentions_business(message)
}

/// Split on question marks; `None` unless at least two questions remain.
pub fn split_on_question_marks(message: &str) -> Option<Vec<String>> {
    if message.matches('?').count() < 2 {
        return None;
    }
    let questions: Vec<String> = message
        .split('?')
        .map(str::trim)
        .filter(|q| normalize(q).chars().count() >= 3)
        .map(|q| format!("{}?", q))
        .collect();
    (questions.len() >= 2).then_some(questions)
}

/// Sentence split on `.`, `!` and `?` followed by whitespace. A period followed
/// by a digit or a lower-case word ("Art. 4", "e.g. shops") does not end a
/// sentence, and fragments shorter than two words join the previous sentence.
pub fn split_sentences(message: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_gap = chars.peek().map_or(true, |next| next.is_whitespace());
        let boundary = match c {
            '!' | '?' => at_gap,
            '.' => at_gap && !continues_sentence(chars.clone()),
            _ => false,
        };
        if boundary {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn continues_sentence(mut rest: impl Iterator<Item = char>) -> bool {
    rest.find(|c| !c.is_whitespace())
        .is_some_and(|c| c.is_ascii_digit() || c.is_lowercase())
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    match sentences.last_mut() {
        Some(last) if normalize(text).split_whitespace().count() < MIN_SENTENCE_WORDS => {
            last.push(' ');
            last.push_str(text);
        }
        _ => sentences.push(text.to_string()),
    }
}

fn opening_word(sentence: &str) -> Option<String> {
    normalize(sentence)
        .split_whitespace()
        .find(|w| !LEAD_FILLERS.contains(w))
        .map(str::to_string)
}

/// Ends in `?` or opens with an interrogative or an imperative.
pub fn is_question_like(sentence: &str) -> bool {
    if sentence.trim_end().ends_with('?') {
        return true;
    }
    opening_word(sentence).is_some_and(|w| {
        INTERROGATIVES.contains(&w.as_str()) || IMPERATIVES.contains(&w.as_str())
    })
}

/// At least two sentences, every one of them a question or a request.
pub fn split_on_sentences(message: &str) -> Option<Vec<String>> {
    let sentences = split_sentences(message);
    (sentences.len() >= 2 && sentences.iter().all(|s| is_question_like(s))).then_some(sentences)
}

/// Wh-word hits and their share of all words.
pub fn question_word_density(message: &str) -> (usize, f32) {
    let normalized = normalize(message);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return (0, 0.0);
    }
    let hits = words.iter().filter(|w| QUESTION_WORDS.contains(*w)).count();
    (hits, hits as f32 / words.len() as f32)
}

/// Heuristics disagree: worth a model split.
pub fn is_ambiguous(message: &str) -> bool {
    if is_ambiguous_compound(message) {
        return true;
    }

    let sentences = split_sentences(message);
    let question_like = sentences.iter().filter(|s| is_question_like(s)).count();
    if sentences.len() >= 2 && question_like >= 2 {
        return true;
    }

    let (hits, density) = question_word_density(message);
    hits >= DENSITY_MIN_HITS && density >= DENSITY_THRESHOLD
}

/// One question mark but at least two interrogative clauses joined by a conjunction.
pub fn is_ambiguous_compound(message: &str) -> bool {
    if message.matches('?').count() != 1 {
        return false;
    }
    let normalized = normalize(message);
    let words: Vec<&str> = normalized.split(' ').collect();

    let mut clause_starts = vec![0usize];
    clause_starts.extend(
        words
            .iter()
            .enumerate()
            .filter(|(_, w)| CONJUNCTIONS.contains(*w))
            .map(|(i, _)| i + 1),
    );

    let interrogative_clauses = clause_starts
        .iter()
        .filter(|&&i| words.get(i).is_some_and(|w| INTERROGATIVES.contains(w)))
        .count();
    clause_starts.len() > 1 && interrogative_clauses >= 2
}

fn split_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["questions"]
    })
}

pub struct RequestClassifier {
    model: Arc<dyn LanguageModel>,
}

impl RequestClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Route one message. `previous_user_message` is the last user turn of the session.
    pub async fn classify(&self, message: &str, previous_user_message: Option<&str>) -> Route {
        if is_short_negation(message) {
            debug!("Short negation fast path");
            return Route::ShortNegation;
        }

        if let Some(previous) = previous_user_message {
            if is_reask(message, previous) {
                debug!("Detected re-ask of previous question");
                return Route::Reask {
                    previous: previous.to_string(),
                };
            }
        }

        let text = preprocess(message);

        if let Some(kind) = classify_small_talk(&text) {
            return Route::Simple(kind);
        }

        if is_business_info(&text) {
            return Route::BusinessInfo;
        }

        if let Some(questions) = split_on_question_marks(&text) {
            return Route::Multiple(questions);
        }

        if let Some(questions) = split_on_sentences(&text) {
            return Route::Multiple(questions);
        }

        if is_ambiguous(&text) {
            if let Some(questions) = self.split_with_model(&text).await {
                return Route::Multiple(questions);
            }
        }

        Route::Single
    }

    async fn split_with_model(&self, text: &str) -> Option<Vec<String>> {
        let prompt = format!(
            "Split the following message into independent questions. Keep each question \
             self-contained and in the original language. If it is really one question, \
             return it as the only element.\n\nMessage: {}",
            text
        );

        match self.model.complete_structured(&prompt, &split_schema()).await {
            Ok(value) => {
                let questions: Vec<String> = value
                    .get("questions")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::trim)
                            .filter(|q| !q.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (questions.len() >= 2).then_some(questions)
            }
            Err(e) => {
                warn!("Question split failed, treating as single: {}", e);
                None
            }
        }
    }
}
