//! Identifier casing strategies
//!
//! Table and column names travel between two conventions: the one used by
//! the database (`snake_case` by default) and the one used by application
//! records (`camelCase` by default). A [`Casing`] rewrites a name into its
//! convention; converting through the inverse strategy restores the
//! original for canonical names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A naming convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Casing {
    /// `first_name`
    Snake,
    /// `firstName`
    Camel,
    /// `FirstName`
    Pascal,
    /// `first-name`
    Kebab,
    /// `FIRST_NAME`
    Constant,
}

impl Casing {
    pub const ALL: [Casing; 5] = [
        Casing::Snake,
        Casing::Camel,
        Casing::Pascal,
        Casing::Kebab,
        Casing::Constant,
    ];

    /// Rewrite `input` into this convention.
    ///
    /// Leading underscores are kept so that private-looking names survive.
    pub fn convert(self, input: &str) -> String {
        let prefix_len = input.len() - input.trim_start_matches('_').len();
        let (prefix, rest) = input.split_at(prefix_len);
        let words = split_words(rest);

        let body = match self {
            Casing::Snake => join_lower(&words, "_"),
            Casing::Kebab => join_lower(&words, "-"),
            Casing::Constant => words
                .iter()
                .map(|w| w.to_uppercase())
                .collect::<Vec<_>>()
                .join("_"),
            Casing::Camel => words
                .iter()
                .enumerate()
                .map(|(idx, w)| {
                    if idx == 0 {
                        w.to_lowercase()
                    } else {
                        capitalize(w)
                    }
                })
                .collect(),
            Casing::Pascal => words.iter().map(|w| capitalize(w)).collect(),
        };

        format!("{prefix}{body}")
    }
}

impl fmt::Display for Casing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Casing::Snake => write!(f, "snake"),
            Casing::Camel => write!(f, "camel"),
            Casing::Pascal => write!(f, "pascal"),
            Casing::Kebab => write!(f, "kebab"),
            Casing::Constant => write!(f, "constant"),
        }
    }
}

impl FromStr for Casing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snake" => Ok(Casing::Snake),
            "camel" => Ok(Casing::Camel),
            "pascal" => Ok(Casing::Pascal),
            "kebab" => Ok(Casing::Kebab),
            "constant" => Ok(Casing::Constant),
            _ => Err(format!("Unknown casing: {}", s)),
        }
    }
}

/// Split a name into words at separators and case boundaries.
///
/// Digits stay attached to the word they follow; an upper-case run followed
/// by a lower-case letter starts a new word at its last capital
/// (`HTTPServer` → `HTTP`, `Server`). A capital after a digit only starts a
/// new word when the word so far has lower-case letters, so `MD5HASH` stays
/// one word while `address1Line` splits.
fn split_words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();
    let mut current_has_lower = false;

    for (idx, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
                current_has_lower = false;
            }
            continue;
        }

        if ch.is_uppercase() && !current.is_empty() {
            let prev = chars[idx - 1];
            let next_is_lower = chars.get(idx + 1).is_some_and(|c| c.is_lowercase());
            if prev.is_lowercase()
                || (prev.is_ascii_digit() && current_has_lower)
                || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
                current_has_lower = false;
            }
        }

        current_has_lower |= ch.is_lowercase();
        current.push(ch);
    }

    if !current.is_empty() {
        words.push(current);
    }

    words
}

fn join_lower(words: &[String], separator: &str) -> String {
    words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(separator)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
