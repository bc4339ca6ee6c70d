use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::errors::{CountError, CountResult};

/// Returns true for the bytes that make up words: ASCII letters, digits and
/// underscore. Every other byte, including all bytes of multi-byte UTF-8
/// sequences, separates words.
pub const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// A validated, case-folded search term.
///
/// Terms are a single word: non-empty and made only of word bytes. That keeps
/// whole-token splitting, boundary matching and the device's positional
/// comparison in exact agreement, and it means occurrences can never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    folded: String,
}

impl Term {
    pub fn new(raw: &str) -> CountResult<Self> {
        if raw.is_empty() {
            return Err(CountError::invalid_term("term is empty"));
        }
        if let Some(bad) = raw.bytes().find(|&b| !is_word_byte(b)) {
            return Err(CountError::invalid_term(format!(
                "'{}' contains non-word byte 0x{:02x}; terms are ASCII letters, digits and '_'",
                raw, bad
            )));
        }
        Ok(Self {
            folded: raw.to_ascii_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.folded
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.folded.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.folded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folded)
    }
}

/// Counts whole-word occurrences of a term in a text unit.
///
/// Both operands are ASCII-lowercased, then the term must be delimited by an
/// ASCII word boundary on each side. `"cat, cat! cat?"` holds three `cat`s;
/// `"category scatter"` holds none.
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    term: Term,
    regex: Arc<Regex>,
}

impl TokenMatcher {
    pub fn new(term: Term) -> CountResult<Self> {
        let pattern = format!(r"(?-u:\b){}(?-u:\b)", regex::escape(term.as_str()));
        let regex = Regex::new(&pattern).map_err(|e| CountError::invalid_term(e.to_string()))?;
        Ok(Self {
            term,
            regex: Arc::new(regex),
        })
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    /// Number of occurrences of the term in `text`
    pub fn count(&self, text: &str) -> u64 {
        let folded = if text.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(text.to_ascii_lowercase())
        } else {
            Cow::Borrowed(text)
        };
        self.regex.find_iter(&folded).count() as u64
    }
}
