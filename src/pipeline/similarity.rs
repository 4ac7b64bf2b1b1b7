//! Confidence scoring between summaries.
//!
//! Similarity is cosine similarity on term-frequency vectors. Tokenization
//! handles mixed Chinese and English content: ASCII alphanumeric runs become
//! lowercased word tokens, CJK ideographs become single-character tokens,
//! everything else separates.

use std::collections::HashMap;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'      // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'    // Extension A
        | '\u{F900}'..='\u{FAFF}'    // Compatibility Ideographs
    )
}

/// Split text into lowercased tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            word.extend(c.to_lowercase());
        } else {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            if is_cjk(c) {
                tokens.push(c.to_string());
            }
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of the two texts' term-frequency vectors, in [0, 1].
/// Empty or token-free inputs score 0.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let tf_a = term_frequencies(a);
    let tf_b = term_frequencies(b);
    if tf_a.is_empty() || tf_b.is_empty() {
        return 0.0;
    }

    let dot: f64 = tf_a
        .iter()
        .filter_map(|(token, count)| tf_b.get(token).map(|other| count * other))
        .sum();
    let norm_a: f64 = tf_a.values().map(|c| c * c).sum::<f64>().sqrt();
    let norm_b: f64 = tf_b.values().map(|c| c * c).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
