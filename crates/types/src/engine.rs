//! Builder engine tags

use k6x_errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a builder backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Builds inside a disposable container
    Docker,
    /// Builds with a toolchain installed on the host
    Native,
}

impl Engine {
    /// All known engines in default preference order
    pub const ALL: [Engine; 2] = [Engine::Docker, Engine::Native];

    /// Parse a comma separated preference list such as `docker,native`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any entry is not a known engine.
    pub fn parse_list(field: &str, value: &str) -> Result<Vec<Self>, ConfigError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|_| ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: s.to_string(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown builder engine: {other}")),
        }
    }
}

impl clap::ValueEnum for Engine {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}
