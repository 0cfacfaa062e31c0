use std::collections::HashSet;

use crate::ident::Identifier;

/// Set of database ids callers may target.  An empty set disables the gate:
/// an unconfigured deployment permits every database rather than none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    /// Parse a comma separated list.  Entries are trimmed and blanks dropped.
    pub fn from_csv(raw: &str) -> Self {
        raw.split(',').collect()
    }

    pub fn permits(&self, candidate: &Identifier) -> bool {
        self.entries.is_empty() || self.entries.contains(&candidate.as_string())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }
}
