//! Enforcement configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constraint::MatchMode;
use crate::error::Error;

/// What dropping a referenced unique constraint or table does to its referencers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropBehavior {
    /// Refuse the drop while foreign keys reference it.
    #[default]
    Restrict,
    /// Drop the referencing foreign keys first.
    Cascade,
}

/// Knobs for constraint enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Schema used when a request names no schema.
    pub default_schema: String,

    /// Match mode for foreign keys declared without one.
    pub default_match: MatchMode,

    /// Drop behavior when a dropped object still has referencers.
    pub drop_behavior: DropBehavior,

    /// Create an index over foreign key columns when none exists.
    pub index_referencing_columns: bool,

    /// Permit referenced-side checks to scan the referencing table when it
    /// has no index over the foreign key columns.
    pub allow_full_scan: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            default_schema: "PUBLIC".to_string(),
            default_match: MatchMode::Simple,
            drop_behavior: DropBehavior::Restrict,
            index_referencing_columns: true,
            allow_full_scan: true,
        }
    }
}

impl EnforcementConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn with_default_match(mut self, mode: MatchMode) -> Self {
        self.default_match = mode;
        self
    }

    pub fn with_drop_behavior(mut self, behavior: DropBehavior) -> Self {
        self.drop_behavior = behavior;
        self
    }

    pub fn with_index_referencing_columns(mut self, enabled: bool) -> Self {
        self.index_referencing_columns = enabled;
        self
    }

    pub fn with_full_scan(mut self, allowed: bool) -> Self {
        self.allow_full_scan = allowed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_defaults() {
        let config = EnforcementConfig::from_json_str(r#"{"drop_behavior": "cascade"}"#).unwrap();
        assert_eq!(config.drop_behavior, DropBehavior::Cascade);
        assert_eq!(config.default_schema, "PUBLIC");
        assert!(config.index_referencing_columns);
    }

    #[test]
    fn test_json_match_mode() {
        let config = EnforcementConfig::from_json_str(
            r#"{"default_match": "full", "allow_full_scan": false}"#,
        )
        .unwrap();
        assert_eq!(config.default_match, MatchMode::Full);
        assert!(!config.allow_full_scan);
    }

    #[test]
    fn test_invalid_json() {
        let err = EnforcementConfig::from_json_str(r#"{"drop_behavior": "sideways"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enforcement.json");
        std::fs::write(&path, r#"{"default_schema": "APP"}"#).unwrap();
        let config = EnforcementConfig::from_json_file(&path).unwrap();
        assert_eq!(config, EnforcementConfig::default().with_default_schema("APP"));

        assert!(EnforcementConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
