//! Configuration parsing and validation.
//!
//! The portal's operational tooling is configured from one TOML file:
//! where the attribute store lives, which project holds the oversight
//! requests and how many institutions review them, and the endpoints of
//! the two surveys (the system access agreement and the oversight
//! request form).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value fails validation.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    /// Attribute-store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Oversight project settings.
    pub oversight: OversightConfig,

    /// System access agreement survey, when configured.
    #[serde(default)]
    pub saa_survey: Option<SurveyConfig>,

    /// Oversight request survey, when configured.
    #[serde(default)]
    pub oversight_survey: Option<SurveyConfig>,
}

/// Attribute-store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the store's database file.
    pub db: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("steward.db"),
        }
    }
}

/// Oversight project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OversightConfig {
    /// Project holding the oversight request records.
    pub project_id: i64,

    /// Number of reviewing institutions; a decision needs this many
    /// matching approvals.
    #[serde(default = "default_parties")]
    pub parties: u32,
}

const fn default_parties() -> u32 {
    3
}

/// Endpoint settings for one survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Survey API address.
    pub api_url: String,
    /// API token.
    pub token: String,
    /// Public survey base URL personal links are built on.
    pub survey_url: String,
    /// Mail domain invited users belong to.
    pub domain: String,
    /// Survey identifier in the external system.
    pub survey_id: i64,
    /// Project the survey stores its records under.
    pub project_id: i64,
}

impl StewardConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.oversight.parties == 0 {
            return Err(ConfigError::Validation(
                "oversight.parties must be at least 1".to_string(),
            ));
        }
        if self.oversight.project_id <= 0 {
            return Err(ConfigError::Validation(
                "oversight.project_id must be positive".to_string(),
            ));
        }
        for (section, survey) in [
            ("saa_survey", &self.saa_survey),
            ("oversight_survey", &self.oversight_survey),
        ] {
            if let Some(survey) = survey {
                if survey.token.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{section}.token must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The survey section named `saa` or `oversight`, when configured.
    #[must_use]
    pub fn survey(&self, name: &str) -> Option<&SurveyConfig> {
        match name {
            "saa" => self.saa_survey.as_ref(),
            "oversight" => self.oversight_survey.as_ref(),
            _ => None,
        }
    }
}
