use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

pub const DEFAULT_TAG_LABEL: &str = "Puppet";
pub const DEFAULT_CRONTAB_PROGRAM: &str = "crontab";
pub const DEFAULT_SPOOL_DIR: &str = "/var/spool/cron/crontabs";

/// Top-level config (cronkeep.toml + CRONKEEP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronkeepConfig {
    #[serde(default)]
    pub tag: TagConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Identity comment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Word between `#` and `Name:` in identity comments, e.g. `# Puppet Name: backup`.
    /// Keeping the historical default lets documents tagged by older tooling re-match.
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
        }
    }
}

/// Where schedule documents are read from and written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Executable used by the `crontab` backend.
    #[serde(default = "default_program")]
    pub program: String,
    /// Directory holding one file per user for the `spool` backend.
    #[serde(default = "default_spool")]
    pub spool: PathBuf,
    /// Treat a user without a document as an error instead of an empty document.
    #[serde(default)]
    pub strict: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            program: default_program(),
            spool: default_spool(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Shell out to `crontab -u <user>`.
    #[default]
    Crontab,
    /// Edit spool files directly.
    Spool,
    /// Process-local documents; nothing touches the host.
    Memory,
}

fn default_label() -> String {
    DEFAULT_TAG_LABEL.to_string()
}
fn default_program() -> String {
    DEFAULT_CRONTAB_PROGRAM.to_string()
}
fn default_spool() -> PathBuf {
    PathBuf::from(DEFAULT_SPOOL_DIR)
}

impl CronkeepConfig {
    /// Load config from a TOML file with CRONKEEP_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `CRONKEEP_CONFIG`
    ///   3. ~/.cronkeep/cronkeep.toml
    ///
    /// A missing file is not an error; every setting has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CRONKEEP_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading configuration");

        let config: CronkeepConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONKEEP_").ignore(&["config"]).split("_"))
            .extract()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if config.tag.label.is_empty() || config.tag.label.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "tag.label must be a single word, got {:?}",
                config.tag.label
            )));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronkeep/cronkeep.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = CronkeepConfig::load(path.to_str()).unwrap();
        assert_eq!(config.tag.label, "Puppet");
        assert_eq!(config.backend.kind, BackendKind::Crontab);
        assert_eq!(config.backend.program, "crontab");
        assert!(!config.backend.strict);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[tag]\nlabel = \"Cronkeep\"\n\n[backend]\nkind = \"spool\"\nspool = \"/tmp/tabs\"\nstrict = true"
        )
        .unwrap();

        let config = CronkeepConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.tag.label, "Cronkeep");
        assert_eq!(config.backend.kind, BackendKind::Spool);
        assert_eq!(config.backend.spool, PathBuf::from("/tmp/tabs"));
        assert!(config.backend.strict);
    }

    #[test]
    fn multi_word_label_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tag]\nlabel = \"two words\"").unwrap();

        let err = CronkeepConfig::load(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("single word"));
    }

    #[test]
    fn unknown_backend_kind_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nkind = \"ftp\"").unwrap();

        assert!(CronkeepConfig::load(file.path().to_str()).is_err());
    }
}
