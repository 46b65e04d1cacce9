//! `cronkeep-engine` — declarative reconciliation of per-user crontab documents.
//!
//! # Overview
//!
//! A caller declares [`CronEntry`] values (schedule, command, environment,
//! identity name). The engine parses the user's live document into a lossless
//! [`Document`], locates each entry's record, and rewrites only what differs.
//! Comments, foreign jobs and unrelated environment lines survive unchanged.
//!
//! # Components
//!
//! | Module        | Role                                                       |
//! |---------------|------------------------------------------------------------|
//! | [`field`]     | Field domains, validation, canonical tokens                |
//! | [`document`]  | Line classification and byte-exact re-rendering            |
//! | [`matcher`]   | Identity-tag lookup, then content adoption of untagged jobs |
//! | [`reconcile`] | Sync states, change events, apply, backend-driven driver   |
//! | [`backend`]   | Memory, spool-file and `crontab(1)` storage                |
//!
//! A document written by the engine looks like:
//!
//! ```text
//! # Puppet Name: backup
//! MAILTO = ops
//! 0 2 * * 1-5 /usr/local/bin/backup
//! ```

pub mod backend;
pub mod document;
pub mod error;
pub mod field;
pub mod matcher;
pub mod reconcile;
pub mod types;

pub use backend::{from_config, CommandBackend, CrontabBackend, MemoryBackend, SpoolBackend};
pub use document::{Document, IdentityTag, JobRecord, Record};
pub use error::{CronError, Result};
pub use field::{normalize_token, render, validate, FieldInput, ScheduleField, ScheduleValue};
pub use matcher::{find_match, DeclaredNames, Match};
pub use reconcile::{
    apply, retrieve, Applied, ChangeEvent, Observed, Reconciler, Retrieval, SyncState,
};
pub use types::{CronEntry, CronEntryBuilder, CronName, Ensure, Schedule};
