//! Text measurement in the unit the group budget is expressed in.
//!
//! Token mode uses the o200k_base encoding, which is what the chat
//! endpoint bills by; Char mode counts Unicode scalar values. Both the
//! sentence buffer and the group budget go through the same counter so
//! the two grouping phases can never disagree on sizes.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::config::CountUnit;

/// Loading the BPE ranks is slow; share one instance process-wide.
static O200K_BASE: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::o200k_base().expect("o200k_base tables are bundled"));

/// Counts and slices text in a fixed [`CountUnit`]
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    unit: CountUnit,
}

impl TokenCounter {
    pub fn new(unit: CountUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> CountUnit {
        self.unit
    }

    /// Size of `text` in the configured unit
    pub fn count(&self, text: &str) -> usize {
        match self.unit {
            CountUnit::Char => text.chars().count(),
            CountUnit::Token => O200K_BASE.encode_ordinary(text).len(),
        }
    }

    /// Split `text` so the head is at most `limit` units.
    ///
    /// The two halves always concatenate back to the input. In token
    /// mode the cut moves left until both halves decode as UTF-8, so a
    /// multi-byte character is never torn apart.
    pub fn split_at(&self, text: &str, limit: usize) -> (String, String) {
        if limit == 0 || text.is_empty() {
            return (String::new(), text.to_string());
        }
        match self.unit {
            CountUnit::Char => {
                let cut = text
                    .char_indices()
                    .nth(limit)
                    .map(|(i, _)| i)
                    .unwrap_or(text.len());
                (text[..cut].to_string(), text[cut..].to_string())
            }
            CountUnit::Token => {
                let tokens = O200K_BASE.encode_ordinary(text);
                if tokens.len() <= limit {
                    return (text.to_string(), String::new());
                }
                let mut cut = limit;
                while cut > 0 {
                    if let Ok(head) = O200K_BASE.decode(tokens[..cut].to_vec()) {
                        // The head is a prefix of the input bytes, so the
                        // remainder can be taken from the source directly.
                        let tail = text[head.len()..].to_string();
                        return (head, tail);
                    }
                    cut -= 1;
                }
                // Pathological token boundary; fall back to one character.
                let first = text.chars().next().map(char::len_utf8).unwrap_or(0);
                (text[..first].to_string(), text[first..].to_string())
            }
        }
    }
}
