//! Version parsing and total ordering.
//!
//! Versions are compared token by token after splitting the string into runs
//! of digits and runs of letters (`.`, `-`, `_` and `+` only separate):
//!
//! ```text
//! dev < a/alpha < b/beta < rc/c/pre/preview = other words < 0 < post/rev/r < 1 < 2 ...
//! ```
//!
//! A missing token counts as the number `0`, so `1.0 == 1.0.0` in ordering
//! terms and `1.0rc1 < 1.0 < 1.0.post1 < 1.0.1`. Two versions whose tokens are
//! equivalent fall back to comparing their raw strings, which keeps the order
//! total and consistent with `Eq`.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Errors produced when parsing a [`Version`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Empty (or `v`-only) version string.
    #[error("version is empty")]
    Empty,

    /// A character outside `[A-Za-z0-9.+_-]`.
    #[error("invalid character '{ch}' in version '{raw}'")]
    InvalidChar {
        /// The offending character.
        ch: char,
        /// The full input.
        raw: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Digits with leading zeros stripped (`"0"` for all-zero runs).
    Num(String),
    /// Lowercased word with its ordering rank.
    Word(u8, String),
}

const NUMBER_RANK: u8 = 4;
const POST_RANK: u8 = 5;

impl Token {
    fn word(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        let (rank, canonical) = match lower.as_str() {
            "dev" => (0, "dev".to_string()),
            "a" | "alpha" => (1, "a".to_string()),
            "b" | "beta" => (2, "b".to_string()),
            "c" | "rc" | "pre" | "preview" => (3, "rc".to_string()),
            "post" | "rev" | "r" => (POST_RANK, "post".to_string()),
            _ => (3, lower),
        };
        Self::Word(rank, canonical)
    }

    fn number(raw: &str) -> Self {
        let trimmed = raw.trim_start_matches('0');
        Self::Num(if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        })
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Num(_) => NUMBER_RANK,
            Self::Word(rank, _) => *rank,
        }
    }
}

fn compare_tokens(a: &Token, b: &Token) -> Ordering {
    match (a, b) {
        // Stripped digit runs: longer is bigger, then lexical.
        (Token::Num(x), Token::Num(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Token::Word(ra, x), Token::Word(rb, y)) => ra.cmp(rb).then_with(|| x.cmp(y)),
        // Post-release markers sit between 0 and 1.
        (Token::Word(POST_RANK, _), Token::Num(n)) => {
            if n == "0" {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Token::Num(_), Token::Word(POST_RANK, _)) => compare_tokens(b, a).reverse(),
        _ => a.rank().cmp(&b.rank()),
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, VersionError> {
    let body = raw
        .strip_prefix('v')
        .or_else(|| raw.strip_prefix('V'))
        .unwrap_or(raw);

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut digits = false;

    let flush = |current: &mut String, digits: bool, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(if digits {
                Token::number(current)
            } else {
                Token::word(current)
            });
            current.clear();
        }
    };

    for ch in body.chars() {
        if ch.is_ascii_digit() {
            if !digits {
                flush(&mut current, digits, &mut tokens);
                digits = true;
            }
            current.push(ch);
        } else if ch.is_ascii_alphabetic() {
            if digits {
                flush(&mut current, digits, &mut tokens);
                digits = false;
            }
            current.push(ch);
        } else if matches!(ch, '.' | '-' | '_' | '+') {
            flush(&mut current, digits, &mut tokens);
        } else {
            return Err(VersionError::InvalidChar {
                ch,
                raw: raw.to_string(),
            });
        }
    }
    flush(&mut current, digits, &mut tokens);

    if tokens.is_empty() {
        return Err(VersionError::Empty);
    }
    Ok(tokens)
}

/// A package version with a total, deterministic ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the string is empty or contains characters
    /// other than ASCII alphanumerics and `.`, `-`, `_`, `+`.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let raw = raw.trim();
        let tokens = tokenize(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    /// Return the version string exactly as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether two versions denote the same release (`1.0` and `1.0.0`).
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.cmp_tokens(other) == Ordering::Equal
    }

    fn cmp_tokens(&self, other: &Self) -> Ordering {
        let zero = Token::Num("0".to_string());
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            let a = self.tokens.get(i).unwrap_or(&zero);
            let b = other.tokens.get(i).unwrap_or(&zero);
            match compare_tokens(a, b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_tokens(other).then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.raw == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.raw == *other
    }
}
