use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::is_environment_line;
use crate::error::{CronError, Result};
use crate::field::{validate, FieldInput, ScheduleField, ScheduleValue};

/// Identity of a declared job, written into its `# <Tag> Name: <name>` comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronName(String);

impl CronName {
    /// Accepts letters, digits, `-` and `_` only; whitespace and punctuation
    /// such as `.` are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CronError::InvalidName { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CronName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CronName {
    type Error = CronError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<CronName> for String {
    fn from(name: CronName) -> Self {
        name.0
    }
}

/// Whether a declared job should exist in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// The five validated schedule fields of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub minute: ScheduleValue,
    pub hour: ScheduleValue,
    pub monthday: ScheduleValue,
    pub month: ScheduleValue,
    pub weekday: ScheduleValue,
}

impl Schedule {
    pub fn get(&self, field: ScheduleField) -> &ScheduleValue {
        match field {
            ScheduleField::Minute => &self.minute,
            ScheduleField::Hour => &self.hour,
            ScheduleField::MonthDay => &self.monthday,
            ScheduleField::Month => &self.month,
            ScheduleField::Weekday => &self.weekday,
        }
    }

    fn slot(&mut self, field: ScheduleField) -> &mut ScheduleValue {
        match field {
            ScheduleField::Minute => &mut self.minute,
            ScheduleField::Hour => &mut self.hour,
            ScheduleField::MonthDay => &mut self.monthday,
            ScheduleField::Month => &mut self.month,
            ScheduleField::Weekday => &mut self.weekday,
        }
    }

    /// Rendered tokens in line order.
    pub fn tokens(&self) -> [String; 5] {
        ScheduleField::ALL.map(|field| self.get(field).to_string())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

/// A declared cron job: the state a caller wants for one named entry of one
/// user's schedule document.
///
/// Every field is validated when it is assigned. A setter that fails leaves
/// the entry exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEntry {
    name: Option<CronName>,
    user: String,
    command: String,
    schedule: Schedule,
    environment: Vec<String>,
    ensure: Ensure,
}

impl CronEntry {
    pub fn builder() -> CronEntryBuilder {
        CronEntryBuilder::default()
    }

    pub fn name(&self) -> Option<&CronName> {
        self.name.as_ref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Command text exactly as declared; surrounding whitespace is significant.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn get(&self, field: ScheduleField) -> &ScheduleValue {
        self.schedule.get(field)
    }

    /// `NAME = value` lines written directly above this job's schedule line.
    pub fn environment(&self) -> &[String] {
        &self.environment
    }

    pub fn ensure(&self) -> Ensure {
        self.ensure
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.name = Some(CronName::new(name)?);
        Ok(())
    }

    pub fn set_command(&mut self, command: impl Into<String>) -> Result<()> {
        let command = command.into();
        check_command(&command)?;
        self.command = command;
        Ok(())
    }

    pub fn set_field(&mut self, field: ScheduleField, input: impl Into<FieldInput>) -> Result<()> {
        let value = validate(field, input)?;
        *self.schedule.slot(field) = value;
        Ok(())
    }

    /// Environment lines are owned through the identity comment, so only named
    /// entries may carry them.
    pub fn set_environment(&mut self, environment: Vec<String>) -> Result<()> {
        if !environment.is_empty() && self.name.is_none() {
            return Err(CronError::MissingAttribute("name"));
        }
        check_environment(&environment)?;
        self.environment = environment;
        Ok(())
    }

    pub fn set_ensure(&mut self, ensure: Ensure) {
        self.ensure = ensure;
    }

    /// Schedule line as it would be written: five tokens, a space, the command.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.schedule, self.command)
    }
}

/// Collects raw attribute values and validates them all at once in [`build`].
///
/// [`build`]: CronEntryBuilder::build
#[derive(Debug, Clone, Default)]
pub struct CronEntryBuilder {
    name: Option<String>,
    user: Option<String>,
    command: Option<String>,
    fields: Vec<(ScheduleField, FieldInput)>,
    environment: Vec<String>,
    ensure: Ensure,
}

impl CronEntryBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn field(mut self, field: ScheduleField, input: impl Into<FieldInput>) -> Self {
        self.fields.push((field, input.into()));
        self
    }

    pub fn minute(self, input: impl Into<FieldInput>) -> Self {
        self.field(ScheduleField::Minute, input)
    }

    pub fn hour(self, input: impl Into<FieldInput>) -> Self {
        self.field(ScheduleField::Hour, input)
    }

    pub fn monthday(self, input: impl Into<FieldInput>) -> Self {
        self.field(ScheduleField::MonthDay, input)
    }

    pub fn month(self, input: impl Into<FieldInput>) -> Self {
        self.field(ScheduleField::Month, input)
    }

    pub fn weekday(self, input: impl Into<FieldInput>) -> Self {
        self.field(ScheduleField::Weekday, input)
    }

    pub fn environment<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn ensure(mut self, ensure: Ensure) -> Self {
        self.ensure = ensure;
        self
    }

    /// Validate everything. The first invalid attribute aborts the build and
    /// no entry is produced.
    pub fn build(self) -> Result<CronEntry> {
        let name = self.name.map(CronName::new).transpose()?;
        let user = self
            .user
            .filter(|u| !u.is_empty())
            .ok_or(CronError::MissingAttribute("user"))?;
        let command = match (self.command, self.ensure) {
            (Some(command), _) if !command.trim().is_empty() => command,
            // A job being removed only needs enough to be found by name.
            (command, Ensure::Absent) if name.is_some() => command.unwrap_or_default(),
            _ => return Err(CronError::MissingAttribute("command")),
        };
        check_command(&command)?;
        if !self.environment.is_empty() && name.is_none() {
            return Err(CronError::MissingAttribute("name"));
        }
        check_environment(&self.environment)?;

        let mut schedule = Schedule::default();
        for (field, input) in self.fields {
            *schedule.slot(field) = validate(field, input)?;
        }

        Ok(CronEntry {
            name,
            user,
            command,
            schedule,
            environment: self.environment,
            ensure: self.ensure,
        })
    }
}

/// The command is written after a single separator and read back after all
/// separators, so leading blanks would never compare equal.
fn check_command(command: &str) -> Result<()> {
    let reason = if command.contains('\n') {
        "must be a single line"
    } else if command.starts_with([' ', '\t']) {
        "must not start with whitespace"
    } else {
        return Ok(());
    };
    Err(CronError::InvalidCommand {
        command: command.to_string(),
        reason,
    })
}

/// Lines the parser would not attach to the job again are rejected up front.
fn check_environment(lines: &[String]) -> Result<()> {
    match lines
        .iter()
        .find(|line| line.contains('\n') || !is_environment_line(line))
    {
        Some(line) => Err(CronError::InvalidEnvironment { line: line.clone() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CronEntry {
        CronEntry::builder()
            .name("sample")
            .user("alice")
            .command("date > /dev/null")
            .minute(5)
            .build()
            .unwrap()
    }

    #[test]
    fn names_accept_letters_digits_dash_underscore() {
        for good in ["good-name", "AGoodName", "more_naming", "a1"] {
            assert!(CronName::new(good).is_ok(), "{good} rejected");
        }
    }

    #[test]
    fn names_reject_whitespace_and_punctuation() {
        for bad in ["bad name", "bad.name", "", "tab\tname", "semi;colon"] {
            assert!(
                matches!(CronName::new(bad), Err(CronError::InvalidName { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn unset_fields_default_to_wildcard() {
        let entry = sample();
        assert_eq!(entry.to_line(), "5 * * * * date > /dev/null");
    }

    #[test]
    fn failed_setter_leaves_entry_untouched() {
        let mut entry = sample();
        let before = entry.clone();
        assert!(entry.set_field(ScheduleField::Minute, 60).is_err());
        assert!(entry.set_name("bad.name").is_err());
        assert_eq!(entry, before);
    }

    #[test]
    fn valid_then_invalid_values_in_any_order() {
        let mut entry = sample();
        assert!(entry.set_field(ScheduleField::Hour, 24).is_err());
        entry.set_field(ScheduleField::Hour, 23).unwrap();
        assert!(entry.set_field(ScheduleField::Hour, -1).is_err());
        assert_eq!(entry.get(ScheduleField::Hour).to_string(), "23");
    }

    #[test]
    fn build_fails_atomically_on_any_bad_field() {
        let result = CronEntry::builder()
            .name("atomic")
            .user("alice")
            .command("true")
            .minute(0)
            .month("sept")
            .build();
        assert!(matches!(result, Err(CronError::Validation { .. })));
    }

    #[test]
    fn build_requires_user_and_command() {
        let no_user = CronEntry::builder().command("true").build();
        assert!(matches!(no_user, Err(CronError::MissingAttribute("user"))));

        let no_command = CronEntry::builder().user("alice").build();
        assert!(matches!(
            no_command,
            Err(CronError::MissingAttribute("command"))
        ));
    }

    #[test]
    fn environment_requires_a_name() {
        let unnamed = CronEntry::builder()
            .user("alice")
            .command("true")
            .environment(["PATH=/bin"])
            .build();
        assert!(matches!(unnamed, Err(CronError::MissingAttribute("name"))));

        let mut entry = CronEntry::builder()
            .user("alice")
            .command("true")
            .build()
            .unwrap();
        assert!(entry.set_environment(vec!["PATH=/bin".into()]).is_err());
        assert!(entry.environment().is_empty());
    }

    #[test]
    fn commands_with_leading_blanks_or_newlines_rejected() {
        for bad in [" date", "\tdate", "date\nrm -rf /tmp/x"] {
            let result = CronEntry::builder()
                .name("cmd")
                .user("alice")
                .command(bad)
                .build();
            assert!(
                matches!(result, Err(CronError::InvalidCommand { .. })),
                "{bad:?} accepted"
            );
        }

        let mut entry = sample();
        assert!(entry.set_command(" date").is_err());
        assert!(entry.set_command("date\n").is_err());
        assert_eq!(entry.command(), "date > /dev/null");
    }

    #[test]
    fn environment_lines_must_be_assignments() {
        for bad in ["not an assignment", "= value", "A=1\nB=2", "# COMMENT=1"] {
            let result = CronEntry::builder()
                .name("env")
                .user("alice")
                .command("true")
                .environment([bad])
                .build();
            assert!(
                matches!(result, Err(CronError::InvalidEnvironment { .. })),
                "{bad:?} accepted"
            );
        }

        let mut entry = sample();
        assert!(entry
            .set_environment(vec!["PATH=/bin".into(), "oops".into()])
            .is_err());
        assert!(entry.environment().is_empty());
        entry
            .set_environment(vec!["PATH=/bin".into(), "  MAILTO = ops".into()])
            .unwrap();
        assert_eq!(entry.environment().len(), 2);
    }

    #[test]
    fn removal_by_name_needs_no_command() {
        let entry = CronEntry::builder()
            .name("gone")
            .user("alice")
            .ensure(Ensure::Absent)
            .build()
            .unwrap();
        assert_eq!(entry.command(), "");
    }

    #[test]
    fn clearing_a_field_renders_wildcard() {
        let mut entry = sample();
        entry.set_field(ScheduleField::Minute, FieldInput::Absent).unwrap();
        assert!(entry.get(ScheduleField::Minute).is_wildcard());
        assert_eq!(entry.to_line(), "* * * * * date > /dev/null");
    }

    #[test]
    fn trailing_command_whitespace_is_kept() {
        let entry = CronEntry::builder()
            .user("alice")
            .command("date > /dev/null ")
            .build()
            .unwrap();
        assert_eq!(entry.to_line(), "* * * * * date > /dev/null ");
    }
}
