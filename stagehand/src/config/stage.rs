//! The closed set of deployment stages.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named deployment target environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Local or shared development servers.
    #[default]
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    Production,
}

impl StageId {
    /// Every stage, in promotion order.
    pub const ALL: [Self; 3] = [Self::Development, Self::Staging, Self::Production];

    /// The lowercase stage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownStage {
                stage: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stage() {
        assert_eq!("staging".parse::<StageId>().unwrap(), StageId::Staging);
        assert_eq!("Production".parse::<StageId>().unwrap(), StageId::Production);
    }

    #[test]
    fn test_unknown_stage() {
        let err = "qa".parse::<StageId>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage { stage } if stage == "qa"));
    }

    #[test]
    fn test_default_stage_is_development() {
        assert_eq!(StageId::default(), StageId::Development);
    }
}
