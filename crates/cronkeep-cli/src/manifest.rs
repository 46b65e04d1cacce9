//! TOML manifest of declared jobs.
//!
//! ```toml
//! [[job]]
//! name = "backup"
//! user = "alice"
//! command = "/usr/local/bin/backup"
//! minute = 0
//! hour = [2, 14]
//! weekday = "mon-fri"
//! environment = ["MAILTO = ops"]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use cronkeep_engine::{CronEntry, Ensure, FieldInput, ScheduleField};

#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobSpec>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid manifest {}", path.display()))
    }
}

/// A field as written in the manifest: integer, string, or array of either.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ManifestValue {
    Int(i64),
    Text(String),
    List(Vec<ManifestValue>),
}

impl From<ManifestValue> for FieldInput {
    fn from(value: ManifestValue) -> Self {
        match value {
            ManifestValue::Text(s) if s == "absent" => FieldInput::Absent,
            ManifestValue::Text(s) => FieldInput::Text(s),
            ManifestValue::Int(n) => FieldInput::Int(n),
            ManifestValue::List(items) => {
                FieldInput::List(items.into_iter().map(Into::into).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub name: Option<String>,
    pub user: String,
    pub command: Option<String>,
    pub minute: Option<ManifestValue>,
    pub hour: Option<ManifestValue>,
    pub monthday: Option<ManifestValue>,
    pub month: Option<ManifestValue>,
    pub weekday: Option<ManifestValue>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub ensure: Ensure,
}

impl JobSpec {
    /// How the job is referred to in output.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.command.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Validate every attribute. Any bad field rejects the whole job.
    pub fn to_entry(&self) -> cronkeep_engine::Result<CronEntry> {
        let mut builder = CronEntry::builder()
            .user(self.user.clone())
            .environment(self.environment.iter().cloned())
            .ensure(self.ensure);
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(command) = &self.command {
            builder = builder.command(command.clone());
        }

        let fields = [
            (ScheduleField::Minute, &self.minute),
            (ScheduleField::Hour, &self.hour),
            (ScheduleField::MonthDay, &self.monthday),
            (ScheduleField::Month, &self.month),
            (ScheduleField::Weekday, &self.weekday),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                builder = builder.field(field, value.clone());
            }
        }
        builder.build()
    }
}
