//! Locating the live record that corresponds to a declared entry.

use std::collections::BTreeSet;

use tracing::debug;

use crate::document::{Document, JobRecord};
use crate::types::CronEntry;

/// Names declared for one user in the current reconciliation.
///
/// A record tagged with a name outside this set is treated like an untagged
/// record and may be adopted by an entry whose schedule and command match it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredNames(BTreeSet<String>);

impl DeclaredNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<&'a CronEntry> for DeclaredNames {
    fn from_iter<I: IntoIterator<Item = &'a CronEntry>>(entries: I) -> Self {
        Self(
            entries
                .into_iter()
                .filter_map(|e| e.name().map(|n| n.to_string()))
                .collect(),
        )
    }
}

/// How a record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// The record carries the entry's identity comment.
    Tagged(usize),
    /// An untagged (or undeclared-tag) record with identical schedule and command.
    Adopted(usize),
}

impl Match {
    /// Record index within the document.
    pub fn index(self) -> usize {
        match self {
            Match::Tagged(i) | Match::Adopted(i) => i,
        }
    }
}

/// Find the record `entry` refers to.
///
/// Identity wins over field equality. Without a tagged record, the first
/// adoptable record in document order whose normalized tokens and exact
/// command equal the declared ones is chosen; later duplicates are ignored.
pub fn find_match(doc: &Document, entry: &CronEntry, declared: &DeclaredNames) -> Option<Match> {
    if let Some(name) = entry.name() {
        if let Some((index, _)) = doc.jobs().find(|(_, job)| job.name() == Some(name.as_str())) {
            debug!(%name, index, "matched by identity comment");
            return Some(Match::Tagged(index));
        }
    }

    let wanted = entry.schedule().tokens();
    let found = doc
        .jobs()
        .filter(|(_, job)| is_adoptable(job, declared))
        .find(|(_, job)| job.command() == entry.command() && job.normalized_tokens() == wanted)
        .map(|(index, _)| Match::Adopted(index));

    if let Some(m) = found {
        debug!(name = ?entry.name(), index = m.index(), "matched untagged record by content");
    }
    found
}

fn is_adoptable(job: &JobRecord, declared: &DeclaredNames) -> bool {
    match job.name() {
        None => true,
        Some(name) => !declared.contains(name),
    }
}
