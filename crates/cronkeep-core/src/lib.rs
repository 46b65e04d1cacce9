//! `cronkeep-core` — configuration shared by the engine and the CLI.

pub mod config;
pub mod error;

pub use config::{BackendConfig, BackendKind, CronkeepConfig, TagConfig};
pub use error::{ConfigError, Result};
