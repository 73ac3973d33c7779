//! Exclusion filters applied to classified responses.
//!
//! Every dimension is an exclusion set: a response is dropped as soon as any
//! configured set contains its value. An empty set never excludes anything.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::ClassifiedResponse;

/// Per-dimension exclusion sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    pub status_codes: BTreeSet<u16>,
    pub words: BTreeSet<usize>,
    pub lines: BTreeSet<usize>,
    pub size: BTreeSet<usize>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes.extend(codes);
        self
    }

    pub fn with_words(mut self, words: impl IntoIterator<Item = usize>) -> Self {
        self.words.extend(words);
        self
    }

    pub fn with_lines(mut self, lines: impl IntoIterator<Item = usize>) -> Self {
        self.lines.extend(lines);
        self
    }

    pub fn with_size(mut self, size: impl IntoIterator<Item = usize>) -> Self {
        self.size.extend(size);
        self
    }

    /// True when no dimension is constrained.
    pub fn is_empty(&self) -> bool {
        self.status_codes.is_empty()
            && self.words.is_empty()
            && self.lines.is_empty()
            && self.size.is_empty()
    }

    /// Whether a classified response survives the filters.
    pub fn accepts(&self, response: &ClassifiedResponse) -> bool {
        accept(
            response.lines,
            response.words,
            response.size,
            response.status_code,
            self,
        )
    }
}

/// Returns `false` if any configured dimension matches, `true` otherwise.
pub fn accept(lines: usize, words: usize, size: usize, status_code: u16, filters: &Filters) -> bool {
    !(filters.status_codes.contains(&status_code)
        || filters.lines.contains(&lines)
        || filters.words.contains(&words)
        || filters.size.contains(&size))
}

/// Parse a delimited list of numbers, skipping entries that don't parse.
///
/// Duplicates collapse. Example: `"404, 403,x,404"` → `{403, 404}`.
pub fn parse_unique_numbers<T>(input: &str, delimiter: &str) -> BTreeSet<T>
where
    T: FromStr + Ord,
{
    input
        .split(delimiter)
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
