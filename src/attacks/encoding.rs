//! Payload obfuscation helpers
//!
//! Encoded payload variants slip past naive keyword filters: ROT13,
//! character reversal, and Unicode homoglyph substitution.

use rand::seq::SliceRandom;
use rand::Rng;

/// ROT13 over ASCII letters; everything else passes through.
pub fn rot13(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            other => other,
        })
        .collect()
}

/// Full character reversal.
pub fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

/// Latin → lookalike substitutions drawn from Cyrillic and Greek.
const HOMOGLYPHS: &[(char, char)] = &[
    ('a', 'а'),
    ('c', 'с'),
    ('e', 'е'),
    ('i', 'і'),
    ('o', 'о'),
    ('p', 'р'),
    ('s', 'ѕ'),
    ('x', 'х'),
    ('y', 'у'),
    ('A', 'Α'),
    ('B', 'Β'),
    ('E', 'Ε'),
    ('H', 'Η'),
    ('O', 'Ο'),
];

/// Replaces roughly `ratio` of substitutable characters with homoglyphs.
pub fn homoglyph(text: &str, ratio: f64) -> String {
    let mut rng = rand::thread_rng();
    text.chars()
        .map(|c| {
            let candidates: Vec<char> = HOMOGLYPHS
                .iter()
                .filter(|(latin, _)| *latin == c)
                .map(|(_, glyph)| *glyph)
                .collect();
            if !candidates.is_empty() && rng.gen_bool(ratio.clamp(0.0, 1.0)) {
                *candidates.choose(&mut rng).unwrap_or(&c)
            } else {
                c
            }
        })
        .collect()
}
