//! Sentence segmentation for speech synthesis
//!
//! Responses are spoken one sentence at a time. Numeric dots (decimals such
//! as `3.14` and list enumerators such as `1. `) are masked with private-use
//! sentinels before splitting so they are never read as sentence ends.

use std::sync::LazyLock;

use regex::Regex;

/// Stands in for the dot of a decimal number while splitting
const DECIMAL_SENTINEL: char = '\u{E000}';

/// Stands in for the dot of a list enumerator while splitting
const LIST_SENTINEL: char = '\u{E001}';

/// `<digits>.<digits>`
static DECIMAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\.(\d)").expect("valid regex"));

/// `<digits>.` followed by whitespace
static LIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\s)").expect("valid regex"));

/// Terminal punctuation run followed by whitespace or end of input
static BOUNDARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));

/// Split `text` into speakable sentences, in order
///
/// Each sentence keeps its terminal punctuation and is trimmed; blank pieces
/// are dropped. Text without terminal punctuation comes back as a single
/// sentence, and trailing text after the last terminator is kept as the
/// final sentence.
#[must_use]
pub fn segment(text: &str) -> Vec<String> {
    let masked = mask_numeric_dots(text);

    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in BOUNDARY_REGEX.find_iter(&masked) {
        push_sentence(&mut sentences, &masked[start..boundary.end()]);
        start = boundary.end();
    }
    push_sentence(&mut sentences, &masked[start..]);

    sentences
}

fn mask_numeric_dots(text: &str) -> String {
    // Two passes: overlapping matches such as "1.2.3" need the second
    let decimal = format!("${{1}}{DECIMAL_SENTINEL}${{2}}");
    let masked = DECIMAL_REGEX.replace_all(text, decimal.as_str());
    let masked = DECIMAL_REGEX.replace_all(&masked, decimal.as_str());

    let list = format!("${{1}}{LIST_SENTINEL}${{2}}");
    LIST_REGEX.replace_all(&masked, list.as_str()).into_owned()
}

fn push_sentence(sentences: &mut Vec<String>, piece: &str) {
    let restored: String = piece
        .chars()
        .map(|c| match c {
            DECIMAL_SENTINEL | LIST_SENTINEL => '.',
            other => other,
        })
        .collect();

    let trimmed = restored.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}
