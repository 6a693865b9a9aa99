//! Lexical vectorization: text -> sparse term-frequency vector.
//!
//! A token is either a maximal run of CJK ideographs or a maximal run of
//! ASCII letters (lower-cased). Everything else separates tokens.

use super::types::TermVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Ideograph,
    Latin,
    Separator,
}

fn classify(c: char) -> CharClass {
    if c.is_ascii_alphabetic() {
        CharClass::Latin
    } else if is_cjk_ideograph(c) {
        CharClass::Ideograph
    } else {
        CharClass::Separator
    }
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF      // Extension A
            | 0x4E00..=0x9FFF  // Unified Ideographs
            | 0xF900..=0xFAFF  // Compatibility Ideographs
            | 0x20000..=0x2A6DF // Extension B
    )
}

/// Split text into tokens in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_class = CharClass::Separator;

    for c in text.chars() {
        let class = classify(c);
        if class != current_class && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        match class {
            CharClass::Latin => current.push(c.to_ascii_lowercase()),
            CharClass::Ideograph => current.push(c),
            CharClass::Separator => {}
        }
        current_class = class;
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Term-frequency vector of `text`
pub fn vectorize(text: &str) -> TermVector {
    let mut vector = TermVector::new();
    for token in tokenize(text) {
        *vector.entry(token).or_insert(0) += 1;
    }
    vector
}
