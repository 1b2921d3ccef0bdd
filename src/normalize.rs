//! Deterministic cleaning of address, city and state text.
//!
//! The same output feeds cache keys, outgoing provider queries and the
//! human-readable progress log, so every rule here is ASCII-only and
//! locale independent.

use std::fmt;

use serde::Serialize;

const UNIT_KEYWORDS: &[&str] = &["UNIT", "APT"];

/// Uppercases, strips punctuation and folds `UNIT x` / `APT x` into `#x`.
pub fn normalize_address(text: &str) -> String {
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '#' | '/') {
                c.to_ascii_uppercase()
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut idx = 0;
    while idx < tokens.len() {
        let token = tokens[idx];
        // The keyword only counts mid-address, never as the leading token.
        if idx > 0 && UNIT_KEYWORDS.contains(&token) {
            if let Some(designator) = tokens.get(idx + 1) {
                out.push(format!("#{}", designator.trim_start_matches('#')));
                idx += 2;
                continue;
            }
        }
        out.push(token.to_string());
        idx += 1;
    }
    out.join(" ")
}

/// Title-cases each word: `st. louis` becomes `St. Louis`.
pub fn normalize_city(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut prev_is_letter = false;
    let titled: String = collapsed
        .chars()
        .map(|c| {
            let mapped = if !c.is_alphabetic() {
                c
            } else if prev_is_letter {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            };
            prev_is_letter = c.is_alphabetic();
            mapped
        })
        .collect();
    titled
}

pub fn normalize_state(text: &str) -> String {
    text.trim().to_ascii_uppercase()
}

/// Normalized (address, city, state) triple identifying one lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub address: String,
    pub city: String,
    pub state: String,
}

impl CacheKey {
    pub fn new(address: &str, city: &str, state: &str) -> Self {
        Self {
            address: normalize_address(address),
            city: normalize_city(city),
            state: normalize_state(state),
        }
    }

    /// `City, ST` as recorded in the processed-cities set.
    pub fn city_label(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.address, self.city, self.state)
    }
}

/// A validated five digit US postal code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ZipCode(String);

impl ZipCode {
    /// Accepts `NNNNN` or `NNNNN-NNNN`, keeping only the first five digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let head = raw.trim().split('-').next().unwrap_or_default().trim();
        is_valid_zip(head).then(|| Self(head.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_zip(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}
