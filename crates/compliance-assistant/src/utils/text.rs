//! Text normalization helpers shared by the classifier, the frustration
//! scorer and the suggestion engine.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

const CONTRACTIONS: &[(&str, &str)] = &[
    ("won't", "will not"),
    ("can't", "cannot"),
    ("n't", " not"),
    ("'re", " are"),
    ("'m", " am"),
    ("'ll", " will"),
    ("'ve", " have"),
    ("'d", " would"),
    ("'s", " is"),
];

/// Lower-case, expand English contractions, strip punctuation and collapse
/// whitespace. "What's the EAA??" becomes "what is the eaa".
pub fn normalize(text: &str) -> String {
    let mut lowered = text.to_lowercase().replace(['\u{2019}', '`'], "'");
    for (from, to) in CONTRACTIONS {
        lowered = lowered.replace(from, to);
    }

    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unique words of an already normalized string.
pub fn word_set(normalized: &str) -> HashSet<&str> {
    normalized.unicode_words().collect()
}

/// |A ∩ B| / |A ∪ B| over word sets. Two empty sets score 0.
pub fn jaccard(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    intersection as f32 / union as f32
}

/// Count how many of `keywords` occur in `haystack` (already lower-cased).
pub fn count_matches(haystack: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| haystack.contains(*k)).count()
}

/// First `max_chars` characters, with an ellipsis when truncated.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
