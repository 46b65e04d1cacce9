use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The merged TOML/env configuration could not be extracted or failed validation.
    #[error("Configuration error: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Short error code string for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
