//! Retrieve, compare and apply: converging a document toward declared entries.
//!
//! The free functions work on an in-memory [`Document`] and never touch
//! storage. [`Reconciler`] wraps them with one backend read and at most one
//! write per call.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::CrontabBackend;
use crate::document::{Document, IdentityTag, JobRecord};
use crate::error::{CronError, Result};
use crate::field::{validate, ScheduleField, ScheduleValue};
use crate::matcher::{find_match, DeclaredNames, Match};
use crate::types::{CronEntry, Ensure};

/// Where a declared entry stands relative to the live document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not yet retrieved.
    #[default]
    Unknown,
    InSync,
    NeedsCreate,
    NeedsUpdate,
    NeedsRemove,
}

impl SyncState {
    /// The change applying this state produces. `None` until retrieved.
    pub fn change(self) -> Option<ChangeEvent> {
        match self {
            SyncState::Unknown => None,
            SyncState::InSync => Some(ChangeEvent::Unchanged),
            SyncState::NeedsCreate => Some(ChangeEvent::Created),
            SyncState::NeedsUpdate => Some(ChangeEvent::Changed),
            SyncState::NeedsRemove => Some(ChangeEvent::Removed),
        }
    }
}

/// Externally reported outcome of reconciling one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEvent {
    Created,
    Changed,
    Removed,
    Unchanged,
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeEvent::Created => "created",
            ChangeEvent::Changed => "changed",
            ChangeEvent::Removed => "removed",
            ChangeEvent::Unchanged => "unchanged",
        })
    }
}

/// Snapshot of the matched live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observed {
    name: Option<String>,
    tokens: [String; 5],
    command: String,
    environment: Vec<String>,
}

impl Observed {
    fn from_job(job: &JobRecord) -> Self {
        Self {
            name: job.name().map(str::to_string),
            tokens: job.normalized_tokens(),
            command: job.command().to_string(),
            environment: job.environment().to_vec(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Normalized token for `field`.
    pub fn token(&self, field: ScheduleField) -> &str {
        &self.tokens[field.index()]
    }

    /// Typed value for `field`, or `None` if the live token does not validate.
    pub fn value(&self, field: ScheduleField) -> Option<ScheduleValue> {
        validate(field, self.token(field)).ok()
    }

    /// Whether the field reads as unset (`*`).
    pub fn is_absent(&self, field: ScheduleField) -> bool {
        self.token(field) == "*"
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn environment(&self) -> &[String] {
        &self.environment
    }
}

/// Result of [`retrieve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    pub state: SyncState,
    /// The matched record, if any.
    pub current: Option<Observed>,
}

impl Retrieval {
    pub fn is_in_sync(&self) -> bool {
        self.state == SyncState::InSync
    }

    pub fn change(&self) -> ChangeEvent {
        self.state.change().unwrap_or(ChangeEvent::Unchanged)
    }
}

/// Result of [`apply`]: the converged document and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub document: Document,
    pub change: ChangeEvent,
}

/// Compare `entry` against `doc` without modifying anything.
pub fn retrieve(doc: &Document, entry: &CronEntry, declared: &DeclaredNames) -> Retrieval {
    let (state, found) = assess(doc, entry, declared);
    let current = found
        .and_then(|m| doc.job(m.index()))
        .map(Observed::from_job);
    Retrieval { state, current }
}

/// Produce the document with `entry` converged. Foreign records and other
/// jobs are carried over untouched.
pub fn apply(doc: &Document, entry: &CronEntry, declared: &DeclaredNames) -> Applied {
    let (state, found) = assess(doc, entry, declared);
    let mut document = doc.clone();
    let tag = doc.tag().clone();

    match (state, found) {
        (SyncState::NeedsCreate, None) => document.push_entry(entry),
        (SyncState::NeedsCreate, Some(m)) => {
            // Adopted: tag the existing line and leave its text alone.
            if let Some(job) = document.job_mut(m.index()) {
                if let Some(name) = entry.name() {
                    job.set_tag(&tag, name.as_str());
                }
                job.set_environment(entry.environment());
            }
        }
        (SyncState::NeedsUpdate, Some(m)) => {
            if let Some(job) = document.job_mut(m.index()) {
                if !line_matches(job, entry) {
                    job.rewrite_line(entry);
                }
                if !same_environment(job.environment(), entry.environment()) {
                    job.set_environment(entry.environment());
                }
            }
        }
        (SyncState::NeedsRemove, Some(m)) => {
            document.remove(m.index());
        }
        _ => {}
    }

    let change = state.change().unwrap_or(ChangeEvent::Unchanged);
    debug!(name = ?entry.name(), user = %entry.user(), %change, "applied entry");
    Applied { document, change }
}

fn assess(
    doc: &Document,
    entry: &CronEntry,
    declared: &DeclaredNames,
) -> (SyncState, Option<Match>) {
    let found = find_match(doc, entry, declared);
    let state = match (entry.ensure(), found) {
        (Ensure::Absent, Some(_)) => SyncState::NeedsRemove,
        (Ensure::Absent, None) => SyncState::InSync,
        (Ensure::Present, None) => SyncState::NeedsCreate,
        // Unnamed entries own nothing beyond the line itself.
        (Ensure::Present, Some(Match::Adopted(_))) if entry.name().is_none() => SyncState::InSync,
        (Ensure::Present, Some(Match::Adopted(_))) => SyncState::NeedsCreate,
        (Ensure::Present, Some(Match::Tagged(i))) => match doc.job(i) {
            Some(job) if in_sync(job, entry) => SyncState::InSync,
            _ => SyncState::NeedsUpdate,
        },
    };
    (state, found)
}

fn line_matches(job: &JobRecord, entry: &CronEntry) -> bool {
    job.command() == entry.command() && job.normalized_tokens() == entry.schedule().tokens()
}

fn in_sync(job: &JobRecord, entry: &CronEntry) -> bool {
    line_matches(job, entry) && same_environment(job.environment(), entry.environment())
}

/// Order-insensitive, exact-membership comparison.
fn same_environment(live: &[String], declared: &[String]) -> bool {
    let mut live = live.to_vec();
    let mut declared = declared.to_vec();
    live.sort();
    declared.sort();
    live == declared
}

/// Storage-backed reconciliation driver.
///
/// Every call reads the user's document once and writes it at most once.
/// Callers must serialize calls touching the same user.
pub struct Reconciler<B> {
    backend: B,
    tag: IdentityTag,
}

impl<B: CrontabBackend> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            tag: IdentityTag::default(),
        }
    }

    pub fn with_tag(mut self, tag: IdentityTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tag(&self) -> &IdentityTag {
        &self.tag
    }

    /// Read and parse `user`'s document.
    pub fn load(&self, user: &str) -> Result<Document> {
        let text = self.backend.read(user)?;
        debug!(%user, bytes = text.len(), "loaded schedule document");
        Ok(Document::parse(&text, &self.tag))
    }

    /// Retrieve one entry's state. Only the entry's own name counts as declared.
    pub fn retrieve(&self, entry: &CronEntry) -> Result<Retrieval> {
        let doc = self.load(entry.user())?;
        let declared: DeclaredNames = std::iter::once(entry).collect();
        Ok(retrieve(&doc, entry, &declared))
    }

    /// Converge one entry, writing only when something changed.
    pub fn sync(&self, entry: &CronEntry) -> Result<ChangeEvent> {
        let mut changes = self.sync_all(entry.user(), std::slice::from_ref(entry))?;
        Ok(changes.pop().unwrap_or(ChangeEvent::Unchanged))
    }

    /// Converge every declared entry of `user` against one read of the
    /// document. Returns one change per entry, in input order.
    pub fn sync_all(&self, user: &str, entries: &[CronEntry]) -> Result<Vec<ChangeEvent>> {
        let (doc, changes) = self.plan(user, entries)?;

        let dirty = changes.iter().filter(|c| **c != ChangeEvent::Unchanged).count();
        if dirty > 0 {
            self.backend.write(user, &doc.render())?;
            info!(%user, changed = dirty, "wrote schedule document");
        } else {
            debug!(%user, "schedule document already in sync");
        }
        Ok(changes)
    }

    /// Compute the converged document and per-entry changes without writing.
    pub fn plan(
        &self,
        user: &str,
        entries: &[CronEntry],
    ) -> Result<(Document, Vec<ChangeEvent>)> {
        let mut seen = HashSet::new();
        for entry in entries {
            if entry.user() != user {
                return Err(CronError::UserMismatch {
                    expected: user.to_string(),
                    found: entry.user().to_string(),
                });
            }
            if let Some(name) = entry.name() {
                if !seen.insert(name.as_str()) {
                    return Err(CronError::DuplicateName {
                        name: name.to_string(),
                    });
                }
            }
        }

        let declared: DeclaredNames = entries.iter().collect();
        let mut doc = self.load(user)?;
        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            let applied = apply(&doc, entry, &declared);
            doc = applied.document;
            changes.push(applied.change);
        }
        Ok((doc, changes))
    }

    /// Every job in `user`'s document as an entry. Jobs whose tokens or name
    /// do not validate are skipped.
    pub fn instances(&self, user: &str) -> Result<Vec<CronEntry>> {
        let doc = self.load(user)?;
        let mut entries = Vec::new();
        for (index, job) in doc.jobs() {
            match entry_from_job(user, job) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(%user, index, error = %e, "skipping unrecognised job"),
            }
        }
        Ok(entries)
    }
}

fn entry_from_job(user: &str, job: &JobRecord) -> Result<CronEntry> {
    let mut builder = CronEntry::builder()
        .user(user)
        .command(job.command())
        .environment(job.environment().iter().cloned());
    if let Some(name) = job.name() {
        builder = builder.name(name);
    }
    for field in ScheduleField::ALL {
        builder = builder.field(field, job.token(field));
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn doc(text: &str) -> Document {
        Document::parse(text, &IdentityTag::default())
    }

    fn named(name: &str) -> CronEntry {
        CronEntry::builder()
            .name(name)
            .user("alice")
            .command("date > /dev/null")
            .minute(5)
            .build()
            .unwrap()
    }

    fn declared(entry: &CronEntry) -> DeclaredNames {
        std::iter::once(entry).collect()
    }

    #[test]
    fn state_to_change_mapping() {
        assert_eq!(SyncState::default(), SyncState::Unknown);
        assert_eq!(SyncState::Unknown.change(), None);
        assert_eq!(SyncState::InSync.change(), Some(ChangeEvent::Unchanged));
        assert_eq!(SyncState::NeedsCreate.change(), Some(ChangeEvent::Created));
        assert_eq!(SyncState::NeedsUpdate.change(), Some(ChangeEvent::Changed));
        assert_eq!(SyncState::NeedsRemove.change(), Some(ChangeEvent::Removed));
    }

    #[test]
    fn missing_entry_needs_create() {
        let e = named("fresh");
        let r = retrieve(&doc("# nothing\n"), &e, &declared(&e));
        assert_eq!(r.state, SyncState::NeedsCreate);
        assert!(r.current.is_none());
        assert!(!r.is_in_sync());
        assert_eq!(r.change(), ChangeEvent::Created);
    }

    #[test]
    fn create_appends_tagged_job() {
        let e = named("fresh");
        let applied = apply(&doc("# nothing\n"), &e, &declared(&e));
        assert_eq!(applied.change, ChangeEvent::Created);
        assert_eq!(
            applied.document.render(),
            "# nothing\n# Puppet Name: fresh\n5 * * * * date > /dev/null\n"
        );
        assert!(retrieve(&applied.document, &e, &declared(&e)).is_in_sync());
    }

    #[test]
    fn field_drift_is_updated_in_place() {
        let text = "# head\n# Puppet Name: job\n7 * * * * date > /dev/null\n# tail\n";
        let e = named("job");
        let r = retrieve(&doc(text), &e, &declared(&e));
        assert_eq!(r.state, SyncState::NeedsUpdate);
        assert_eq!(r.current.as_ref().unwrap().token(ScheduleField::Minute), "7");

        let applied = apply(&doc(text), &e, &declared(&e));
        assert_eq!(applied.change, ChangeEvent::Changed);
        assert_eq!(
            applied.document.render(),
            "# head\n# Puppet Name: job\n5 * * * * date > /dev/null\n# tail\n"
        );
    }

    #[test]
    fn environment_only_change_keeps_line_text() {
        let text = "# Puppet Name: job\n5  *  *  *  *  date > /dev/null\n";
        let e = CronEntry::builder()
            .name("job")
            .user("alice")
            .command("date > /dev/null")
            .minute(5)
            .environment(["MAILTO=ops"])
            .build()
            .unwrap();
        let applied = apply(&doc(text), &e, &declared(&e));
        assert_eq!(applied.change, ChangeEvent::Changed);
        assert_eq!(
            applied.document.render(),
            "# Puppet Name: job\nMAILTO=ops\n5  *  *  *  *  date > /dev/null\n"
        );
    }

    #[test]
    fn environment_order_does_not_matter() {
        let text = "# Puppet Name: job\nB=2\nA=1\n5 * * * * date > /dev/null\n";
        let e = CronEntry::builder()
            .name("job")
            .user("alice")
            .command("date > /dev/null")
            .minute(5)
            .environment(["A=1", "B=2"])
            .build()
            .unwrap();
        assert!(retrieve(&doc(text), &e, &declared(&e)).is_in_sync());

        let missing = CronEntry::builder()
            .name("job")
            .user("alice")
            .command("date > /dev/null")
            .minute(5)
            .environment(["A=1"])
            .build()
            .unwrap();
        assert_eq!(
            retrieve(&doc(text), &missing, &declared(&missing)).state,
            SyncState::NeedsUpdate
        );
    }

    #[test]
    fn absent_entry_removes_tag_environment_and_line() {
        let text = "# keep\n# Puppet Name: job\nX=1\n5 * * * * date > /dev/null\n# keep too\n";
        let e = CronEntry::builder()
            .name("job")
            .user("alice")
            .ensure(Ensure::Absent)
            .build()
            .unwrap();
        let applied = apply(&doc(text), &e, &declared(&e));
        assert_eq!(applied.change, ChangeEvent::Removed);
        assert_eq!(applied.document.render(), "# keep\n# keep too\n");

        let again = retrieve(&applied.document, &e, &declared(&e));
        assert!(again.is_in_sync());
    }

    #[test]
    fn adopting_untagged_line_reports_created() {
        let text = "0,30 * * * * date\n";
        let e = CronEntry::builder()
            .name("yaycron")
            .user("alice")
            .command("date")
            .minute(vec![0, 30])
            .build()
            .unwrap();
        let r = retrieve(&doc(text), &e, &declared(&e));
        assert_eq!(r.state, SyncState::NeedsCreate);
        assert!(r.current.is_some());

        let applied = apply(&doc(text), &e, &declared(&e));
        assert_eq!(applied.change, ChangeEvent::Created);
        assert_eq!(
            applied.document.render(),
            "# Puppet Name: yaycron\n0,30 * * * * date\n"
        );
    }

    #[test]
    fn unnamed_match_is_in_sync() {
        let e = CronEntry::builder()
            .user("alice")
            .command("date")
            .hour(2)
            .build()
            .unwrap();
        let r = retrieve(&doc("* 2 * * * date\n"), &e, &DeclaredNames::new());
        assert!(r.is_in_sync());
    }

    #[test]
    fn observed_reports_absent_fields() {
        let e = named("job");
        let r = retrieve(
            &doc("# Puppet Name: job\n5 * * May * date > /dev/null\n"),
            &e,
            &declared(&e),
        );
        let current = r.current.unwrap();
        assert!(current.is_absent(ScheduleField::Hour));
        assert!(!current.is_absent(ScheduleField::Month));
        assert_eq!(current.value(ScheduleField::Month), Some(ScheduleValue::Single(5)));
        assert_eq!(current.name(), Some("job"));
    }

    #[test]
    fn sync_all_rejects_foreign_users_and_duplicates() {
        let reconciler = Reconciler::new(MemoryBackend::new());
        let bob = CronEntry::builder()
            .user("bob")
            .command("true")
            .build()
            .unwrap();
        assert!(matches!(
            reconciler.sync_all("alice", &[bob]),
            Err(CronError::UserMismatch { .. })
        ));
        assert!(matches!(
            reconciler.sync_all("alice", &[named("x"), named("x")]),
            Err(CronError::DuplicateName { .. })
        ));
        assert_eq!(reconciler.backend().write_count(), 0);
    }

    #[test]
    fn sync_writes_once_then_stays_quiet() {
        let reconciler = Reconciler::new(MemoryBackend::new());
        let e = named("job");
        assert_eq!(reconciler.sync(&e).unwrap(), ChangeEvent::Created);
        assert_eq!(reconciler.sync(&e).unwrap(), ChangeEvent::Unchanged);
        assert_eq!(reconciler.backend().write_count(), 1);
        assert!(reconciler.retrieve(&e).unwrap().is_in_sync());
    }

    #[test]
    fn plan_never_writes() {
        let reconciler = Reconciler::new(MemoryBackend::new());
        let (doc, changes) = reconciler.plan("alice", &[named("job")]).unwrap();
        assert_eq!(changes, vec![ChangeEvent::Created]);
        assert_eq!(doc.jobs().count(), 1);
        assert_eq!(reconciler.backend().write_count(), 0);
        assert_eq!(reconciler.backend().document("alice"), None);
    }

    #[test]
    fn custom_tag_label_is_used() {
        let reconciler =
            Reconciler::new(MemoryBackend::new()).with_tag(IdentityTag::new("Cronkeep"));
        reconciler.sync(&named("job")).unwrap();
        assert_eq!(
            reconciler.backend().document("alice").unwrap(),
            "# Cronkeep Name: job\n5 * * * * date > /dev/null\n"
        );
    }

    #[test]
    fn backend_errors_propagate() {
        let reconciler = Reconciler::new(MemoryBackend::new().strict(true));
        assert!(matches!(
            reconciler.sync(&named("job")),
            Err(CronError::NotFound { .. })
        ));
    }
}
