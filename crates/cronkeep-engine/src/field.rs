//! Schedule field domains, validation and canonical rendering.
//!
//! Every value a caller supplies for one of the five schedule positions goes
//! through [`validate`], which is the only place raw input turns into a
//! [`ScheduleValue`]. Comparisons elsewhere in the engine are made on the
//! rendered token, so `[0, 30]`, `"0,30"` and `"00,30"` all compare equal.
//!
//! ```text
//! ┌───────────── minute   (0-59)
//! │ ┌─────────── hour     (0-23)
//! │ │ ┌───────── monthday (1-31)
//! │ │ │ ┌─────── month    (1-12, jan..dec)
//! │ │ │ │ ┌───── weekday  (0-6, sun..sat)
//! * * * * *  command
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CronError, Result};

/// One of the five positional schedule fields of a crontab line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleField {
    Minute,
    Hour,
    MonthDay,
    Month,
    Weekday,
}

const MONTHS: [(&str, &str); 12] = [
    ("jan", "january"),
    ("feb", "february"),
    ("mar", "march"),
    ("apr", "april"),
    ("may", "may"),
    ("jun", "june"),
    ("jul", "july"),
    ("aug", "august"),
    ("sep", "september"),
    ("oct", "october"),
    ("nov", "november"),
    ("dec", "december"),
];

const WEEKDAYS: [(&str, &str); 7] = [
    ("sun", "sunday"),
    ("mon", "monday"),
    ("tue", "tuesday"),
    ("wed", "wednesday"),
    ("thu", "thursday"),
    ("fri", "friday"),
    ("sat", "saturday"),
];

impl ScheduleField {
    /// All fields in the order they appear on a schedule line.
    pub const ALL: [ScheduleField; 5] = [
        ScheduleField::Minute,
        ScheduleField::Hour,
        ScheduleField::MonthDay,
        ScheduleField::Month,
        ScheduleField::Weekday,
    ];

    pub fn min(self) -> u8 {
        match self {
            ScheduleField::MonthDay | ScheduleField::Month => 1,
            _ => 0,
        }
    }

    pub fn max(self) -> u8 {
        match self {
            ScheduleField::Minute => 59,
            ScheduleField::Hour => 23,
            ScheduleField::MonthDay => 31,
            ScheduleField::Month => 12,
            ScheduleField::Weekday => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScheduleField::Minute => "minute",
            ScheduleField::Hour => "hour",
            ScheduleField::MonthDay => "monthday",
            ScheduleField::Month => "month",
            ScheduleField::Weekday => "weekday",
        }
    }

    /// Position of this field on a schedule line.
    pub fn index(self) -> usize {
        match self {
            ScheduleField::Minute => 0,
            ScheduleField::Hour => 1,
            ScheduleField::MonthDay => 2,
            ScheduleField::Month => 3,
            ScheduleField::Weekday => 4,
        }
    }

    /// Resolve a symbolic name. Only the three-letter form and the full name
    /// are accepted, in any case.
    fn alias(self, token: &str) -> Option<u8> {
        let table: &[(&str, &str)] = match self {
            ScheduleField::Month => &MONTHS,
            ScheduleField::Weekday => &WEEKDAYS,
            _ => return None,
        };
        let lower = token.to_ascii_lowercase();
        table
            .iter()
            .position(|(short, long)| lower == *short || lower == *long)
            .map(|pos| pos as u8 + self.min())
    }
}

impl fmt::Display for ScheduleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated schedule field value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScheduleValue {
    /// `*` — every value. Also what a cleared field becomes.
    #[default]
    Wildcard,
    Single(u8),
    /// Comma-joined list, kept in caller order.
    Many(Vec<u8>),
    /// Closed range `a-b`.
    Range(u8, u8),
    /// Step over the whole domain, `*/n`.
    Step(u8),
}

impl ScheduleValue {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, ScheduleValue::Wildcard)
    }
}

impl fmt::Display for ScheduleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleValue::Wildcard => f.write_str("*"),
            ScheduleValue::Single(n) => write!(f, "{n}"),
            ScheduleValue::Many(values) => {
                let joined: Vec<String> = values.iter().map(u8::to_string).collect();
                f.write_str(&joined.join(","))
            }
            ScheduleValue::Range(from, to) => write!(f, "{from}-{to}"),
            ScheduleValue::Step(n) => write!(f, "*/{n}"),
        }
    }
}

/// Raw, unvalidated input for a schedule field as a caller supplies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInput {
    /// Explicitly cleared; normalizes to `*`.
    Absent,
    Int(i64),
    Text(String),
    List(Vec<FieldInput>),
}

impl From<i64> for FieldInput {
    fn from(n: i64) -> Self {
        FieldInput::Int(n)
    }
}

impl From<i32> for FieldInput {
    fn from(n: i32) -> Self {
        FieldInput::Int(n.into())
    }
}

impl From<u32> for FieldInput {
    fn from(n: u32) -> Self {
        FieldInput::Int(n.into())
    }
}

impl From<u8> for FieldInput {
    fn from(n: u8) -> Self {
        FieldInput::Int(n.into())
    }
}

impl From<&str> for FieldInput {
    fn from(s: &str) -> Self {
        FieldInput::Text(s.to_string())
    }
}

impl From<String> for FieldInput {
    fn from(s: String) -> Self {
        FieldInput::Text(s)
    }
}

impl<T: Into<FieldInput>> From<Vec<T>> for FieldInput {
    fn from(items: Vec<T>) -> Self {
        FieldInput::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FieldInput>> From<Option<T>> for FieldInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldInput::Absent, Into::into)
    }
}

impl fmt::Display for FieldInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldInput::Absent => f.write_str("absent"),
            FieldInput::Int(n) => write!(f, "{n}"),
            FieldInput::Text(s) => f.write_str(s),
            FieldInput::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Validate and normalize `input` for `field`.
pub fn validate(field: ScheduleField, input: impl Into<FieldInput>) -> Result<ScheduleValue> {
    match input.into() {
        FieldInput::Absent => Ok(ScheduleValue::Wildcard),
        FieldInput::Int(n) => check_int(field, n).map(ScheduleValue::Single),
        FieldInput::Text(text) => parse_text(field, &text).map_err(|err| restate(err, &text)),
        FieldInput::List(items) => {
            if items.is_empty() {
                return Err(CronError::validation(field, "[]", "empty list"));
            }
            items
                .into_iter()
                .map(|item| list_item(field, item))
                .collect::<Result<Vec<u8>>>()
                .map(ScheduleValue::Many)
        }
    }
}

/// Render a validated value as the token written on the schedule line.
pub fn render(value: &ScheduleValue) -> String {
    value.to_string()
}

/// Canonical form of a token read from a live document.
///
/// Tokens that do not validate are returned untouched, so they still compare
/// by exact text.
pub fn normalize_token(field: ScheduleField, token: &str) -> String {
    match parse_text(field, token) {
        Ok(value) => value.to_string(),
        Err(_) => token.to_string(),
    }
}

/// Report the whole literal the caller passed rather than the fragment that failed.
fn restate(err: CronError, raw: &str) -> CronError {
    match err {
        CronError::Validation { field, reason, .. } => CronError::Validation {
            field,
            value: raw.to_string(),
            reason,
        },
        other => other,
    }
}

fn list_item(field: ScheduleField, item: FieldInput) -> Result<u8> {
    match item {
        FieldInput::Int(n) => check_int(field, n),
        FieldInput::Text(text) => parse_single(field, text.trim()),
        other => Err(CronError::validation(
            field,
            other.to_string(),
            "list elements must be single values",
        )),
    }
}

fn parse_text(field: ScheduleField, raw: &str) -> Result<ScheduleValue> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(CronError::validation(field, raw, "empty value"));
    }
    if text == "*" {
        return Ok(ScheduleValue::Wildcard);
    }
    if let Some(step) = text.strip_prefix("*/") {
        return parse_step(field, step, raw).map(ScheduleValue::Step);
    }
    if text.contains(',') {
        return text
            .split(',')
            .map(|part| parse_single(field, part.trim()))
            .collect::<Result<Vec<u8>>>()
            .map(ScheduleValue::Many);
    }
    if let Some((from, to)) = text.split_once('-') {
        let from = parse_single(field, from)?;
        let to = parse_single(field, to)?;
        if from > to {
            return Err(CronError::validation(field, raw, "range start is after its end"));
        }
        return Ok(ScheduleValue::Range(from, to));
    }
    parse_single(field, text).map(ScheduleValue::Single)
}

fn parse_step(field: ScheduleField, step: &str, raw: &str) -> Result<u8> {
    if step.is_empty() || !step.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CronError::validation(field, raw, "step must be a positive integer"));
    }
    match step.parse::<u8>() {
        Ok(n) if n >= 1 && n <= field.max() => Ok(n),
        _ => Err(CronError::validation(
            field,
            raw,
            format!("step must be between 1 and {}", field.max()),
        )),
    }
}

fn parse_single(field: ScheduleField, token: &str) -> Result<u8> {
    if token.is_empty() {
        return Err(CronError::validation(field, token, "empty value"));
    }
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return match token.parse::<i64>() {
            Ok(n) => check_int(field, n),
            Err(_) => Err(CronError::validation(field, token, "number is too large")),
        };
    }
    field
        .alias(token)
        .ok_or_else(|| CronError::validation(field, token, "not a number or recognised name"))
}

fn check_int(field: ScheduleField, n: i64) -> Result<u8> {
    if n < i64::from(field.min()) || n > i64::from(field.max()) {
        return Err(CronError::validation(
            field,
            n.to_string(),
            format!("must be between {} and {}", field.min(), field.max()),
        ));
    }
    Ok(n as u8)
}
