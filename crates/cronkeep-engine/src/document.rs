//! Lossless structural model of one user's schedule document.
//!
//! Parsing never interprets schedule semantics. Each line becomes a
//! [`Record`] that remembers its exact text, so rendering a document nobody
//! modified reproduces the input byte for byte.
//!
//! Environment lines directly below an identity comment belong to the job the
//! comment tags. Every other environment line is top-level and left alone.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use cronkeep_core::config::DEFAULT_TAG_LABEL;

use crate::field::{normalize_token, ScheduleField};
use crate::types::CronEntry;

static ENV_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\w+\s*=").expect("environment line pattern is valid"));

/// Whether `line` has the `NAME = value` shape of an environment assignment.
pub(crate) fn is_environment_line(line: &str) -> bool {
    ENV_LINE.is_match(line)
}

/// Format of the identity comment, `# <label> Name: <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTag {
    label: String,
}

impl IdentityTag {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn render(&self, name: &str) -> String {
        format!("# {} Name: {}", self.label, name)
    }

    /// Extract the tagged name if `line` is an identity comment.
    pub fn parse<'a>(&self, line: &'a str) -> Option<&'a str> {
        let name = line
            .strip_prefix("# ")?
            .strip_prefix(self.label.as_str())?
            .strip_prefix(" Name: ")?
            .trim_end();
        (!name.is_empty()).then_some(name)
    }
}

impl Default for IdentityTag {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_LABEL)
    }
}

/// The identity comment above a job and its original text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TagLine {
    name: String,
    line: String,
}

/// One schedule line plus the identity comment and environment lines that
/// travel with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    tag: Option<TagLine>,
    environment: Vec<String>,
    tokens: [String; 5],
    command: String,
    line: String,
}

impl JobRecord {
    pub(crate) fn from_entry(entry: &CronEntry, tag: &IdentityTag) -> Self {
        let mut record = Self {
            tag: None,
            environment: entry.environment().to_vec(),
            tokens: entry.schedule().tokens(),
            command: entry.command().to_string(),
            line: entry.to_line(),
        };
        if let Some(name) = entry.name() {
            record.set_tag(tag, name.as_str());
        }
        record
    }

    /// Name from the identity comment, if the job carries one.
    pub fn name(&self) -> Option<&str> {
        self.tag.as_ref().map(|t| t.name.as_str())
    }

    /// The five schedule tokens exactly as written.
    pub fn tokens(&self) -> &[String; 5] {
        &self.tokens
    }

    pub fn token(&self, field: ScheduleField) -> &str {
        &self.tokens[field.index()]
    }

    /// Tokens in canonical form, for comparison with declared values.
    pub fn normalized_tokens(&self) -> [String; 5] {
        ScheduleField::ALL.map(|field| normalize_token(field, self.token(field)))
    }

    /// Command text as written, including any trailing whitespace.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn environment(&self) -> &[String] {
        &self.environment
    }

    pub(crate) fn set_tag(&mut self, tag: &IdentityTag, name: &str) {
        self.tag = Some(TagLine {
            name: name.to_string(),
            line: tag.render(name),
        });
    }

    pub(crate) fn set_environment(&mut self, environment: &[String]) {
        self.environment = environment.to_vec();
    }

    /// Replace the schedule line with the declared one.
    pub(crate) fn rewrite_line(&mut self, entry: &CronEntry) {
        self.tokens = entry.schedule().tokens();
        self.command = entry.command().to_string();
        self.line = entry.to_line();
    }

    fn push_lines<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(tag) = &self.tag {
            out.push(&tag.line);
        }
        out.extend(self.environment.iter().map(String::as_str));
        out.push(&self.line);
    }
}

/// A classified line (or, for jobs, group of lines) of a schedule document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Empty or whitespace-only line.
    Blank(String),
    /// A comment that is not an identity tag for a following job.
    Comment(String),
    /// A `NAME = value` line not owned by any tagged job.
    Environment(String),
    /// Anything unrecognised, kept verbatim.
    Opaque(String),
    Job(JobRecord),
}

/// An ordered, losslessly re-renderable schedule document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    records: Vec<Record>,
    trailing_newline: bool,
    tag: IdentityTag,
}

impl Document {
    pub fn parse(text: &str, tag: &IdentityTag) -> Self {
        let (body, trailing_newline) = match text.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (text, false),
        };

        let mut records = Vec::new();
        let mut pending: Option<(TagLine, Vec<String>)> = None;

        if !text.is_empty() {
            for line in body.split('\n') {
                if let Some((tokens, command)) = split_schedule_line(line) {
                    let (tag_line, environment) = match pending.take() {
                        Some((tag_line, env)) => (Some(tag_line), env),
                        None => (None, Vec::new()),
                    };
                    records.push(Record::Job(JobRecord {
                        tag: tag_line,
                        environment,
                        tokens,
                        command,
                        line: line.to_string(),
                    }));
                    continue;
                }

                if let Some((_, env)) = pending.as_mut() {
                    if ENV_LINE.is_match(line) {
                        env.push(line.to_string());
                        continue;
                    }
                }
                flush_dangling(&mut pending, &mut records);

                if let Some(name) = tag.parse(line) {
                    pending = Some((
                        TagLine {
                            name: name.to_string(),
                            line: line.to_string(),
                        },
                        Vec::new(),
                    ));
                    continue;
                }

                records.push(classify(line));
            }
            flush_dangling(&mut pending, &mut records);
        }

        let doc = Self {
            records,
            trailing_newline,
            tag: tag.clone(),
        };
        debug!(
            records = doc.records.len(),
            jobs = doc.jobs().count(),
            "parsed schedule document"
        );
        doc
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = Vec::with_capacity(self.records.len());
        for record in &self.records {
            match record {
                Record::Blank(line)
                | Record::Comment(line)
                | Record::Environment(line)
                | Record::Opaque(line) => lines.push(line),
                Record::Job(job) => job.push_lines(&mut lines),
            }
        }
        let mut text = lines.join("\n");
        if self.trailing_newline && !lines.is_empty() {
            text.push('\n');
        }
        text
    }

    /// Identity comment format this document was parsed with.
    pub fn tag(&self) -> &IdentityTag {
        &self.tag
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Job records with their record index, in document order.
    pub fn jobs(&self) -> impl Iterator<Item = (usize, &JobRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| match record {
                Record::Job(job) => Some((i, job)),
                _ => None,
            })
    }

    pub fn job(&self, index: usize) -> Option<&JobRecord> {
        match self.records.get(index) {
            Some(Record::Job(job)) => Some(job),
            _ => None,
        }
    }

    pub(crate) fn job_mut(&mut self, index: usize) -> Option<&mut JobRecord> {
        match self.records.get_mut(index) {
            Some(Record::Job(job)) => Some(job),
            _ => None,
        }
    }

    /// Append a job at the end. A document that gains a job always ends with a newline.
    pub(crate) fn push_job(&mut self, job: JobRecord) {
        self.records.push(Record::Job(job));
        self.trailing_newline = true;
    }

    pub(crate) fn push_entry(&mut self, entry: &CronEntry) {
        let job = JobRecord::from_entry(entry, &self.tag);
        self.push_job(job);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<Record> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }
}

/// A tag comment that never reached its schedule line stays foreign text.
fn flush_dangling(pending: &mut Option<(TagLine, Vec<String>)>, records: &mut Vec<Record>) {
    if let Some((tag_line, env)) = pending.take() {
        warn!(name = %tag_line.name, "identity comment not followed by a schedule line");
        records.push(Record::Comment(tag_line.line));
        records.extend(env.into_iter().map(Record::Environment));
    }
}

fn classify(line: &str) -> Record {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Record::Blank(line.to_string())
    } else if trimmed.starts_with('#') {
        Record::Comment(line.to_string())
    } else if ENV_LINE.is_match(line) {
        Record::Environment(line.to_string())
    } else {
        debug!(%line, "keeping unrecognised line verbatim");
        Record::Opaque(line.to_string())
    }
}

const SEPARATORS: [char; 2] = [' ', '\t'];

fn is_schedule_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/'))
}

/// Split `line` into five schedule tokens and the command, or `None` when the
/// line is not a well-formed schedule entry.
fn split_schedule_line(line: &str) -> Option<([String; 5], String)> {
    let first = line.trim_start_matches(SEPARATORS).chars().next()?;
    if first == '#' || first == '@' {
        return None;
    }

    let mut rest = line;
    let mut tokens: [String; 5] = Default::default();
    for slot in tokens.iter_mut() {
        rest = rest.trim_start_matches(SEPARATORS);
        let end = rest.find(SEPARATORS)?;
        let token = &rest[..end];
        if !is_schedule_token(token) {
            return None;
        }
        *slot = token.to_string();
        rest = &rest[end..];
    }

    let command = rest.trim_start_matches(SEPARATORS);
    if command.trim().is_empty() {
        return None;
    }
    Some((tokens, command.to_string()))
}
