use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use catalog::ColumnType;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{RuleId, Severity};
use crate::parser::DEFAULT_MAX_DEPTH;

/// Error for [`ValidatorConfig`] loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error while reading validator config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid validator config: {0}")]
    Json(#[from] serde_json::Error),
    /// `max_depth` must allow at least one level of nesting.
    #[error("max_depth must be greater than 0")]
    InvalidMaxDepth,
}

/// Settings of a single validation run.
///
/// Example file:
/// ```json
/// {
///   "max_depth": 64,
///   "parameter_types": { "since": "DATE" },
///   "disabled_rules": ["UNKNOWN_FUNCTION"],
///   "severity_overrides": { "UNGUARDED_DIVISION": "error" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Maximum nesting of expressions and sub-queries accepted by the parser.
    pub max_depth: usize,
    /// Types of `@name` query parameters, keyed by name without `@`.
    pub parameter_types: BTreeMap<String, ColumnType>,
    pub disabled_rules: Vec<RuleId>,
    pub severity_overrides: BTreeMap<RuleId, Severity>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            parameter_types: BTreeMap::new(),
            disabled_rules: Vec::new(),
            severity_overrides: BTreeMap::new(),
        }
    }
}

impl ValidatorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ValidatorConfig = serde_json::from_str(json)?;
        config.normalized()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        info!("loaded validator config from {}", path.display());
        Ok(config)
    }

    pub fn is_disabled(&self, rule_id: RuleId) -> bool {
        self.disabled_rules.contains(&rule_id)
    }

    pub fn severity_override(&self, rule_id: RuleId) -> Option<Severity> {
        self.severity_overrides.get(&rule_id).copied()
    }

    fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidMaxDepth);
        }
        let mut parameter_types = BTreeMap::new();
        for (name, ty) in std::mem::take(&mut self.parameter_types) {
            let name = match name.strip_prefix('@') {
                Some(stripped) => {
                    warn!("parameter '{name}' configured with '@' prefix, using '{stripped}'");
                    stripped.to_string()
                }
                None => name,
            };
            if parameter_types.insert(name.clone(), ty).is_some() {
                warn!("parameter '{name}' configured more than once, using the last type");
            }
        }
        self.parameter_types = parameter_types;

        let before = self.disabled_rules.len();
        self.disabled_rules.sort();
        self.disabled_rules.dedup();
        if self.disabled_rules.len() != before {
            warn!("disabled_rules contains duplicates");
        }
        for rule_id in &self.disabled_rules {
            if self.severity_overrides.contains_key(rule_id) {
                warn!("severity override for {rule_id} has no effect, the rule is disabled");
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = ValidatorConfig::default();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.parameter_types.is_empty());
        assert!(!config.is_disabled(RuleId::UnguardedDivision));
        assert_eq!(config.severity_override(RuleId::UnguardedDivision), None);
    }

    #[test]
    fn parses_full_config() {
        let config = ValidatorConfig::from_json_str(
            r#"{
                "max_depth": 64,
                "parameter_types": { "@since": "DATE", "ids": "ARRAY<INT64>" },
                "disabled_rules": ["UNKNOWN_FUNCTION", "UNKNOWN_FUNCTION"],
                "severity_overrides": { "UNGUARDED_DIVISION": "error" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.parameter_types["since"], ColumnType::Date);
        assert_eq!(
            config.parameter_types["ids"],
            ColumnType::Array(Box::new(ColumnType::Int64))
        );
        assert_eq!(config.disabled_rules, vec![RuleId::UnknownFunction]);
        assert_eq!(
            config.severity_override(RuleId::UnguardedDivision),
            Some(Severity::Error)
        );
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = ValidatorConfig::from_json_str(r#"{ "disabled_rules": ["INVALID_CAST"] }"#).unwrap();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.is_disabled(RuleId::InvalidCast));
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(matches!(
            ValidatorConfig::from_json_str(r#"{ "max_depth": 0 }"#),
            Err(ConfigError::InvalidMaxDepth)
        ));
        assert!(matches!(
            ValidatorConfig::from_json_str(r#"{ "max_dept": 10 }"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            ValidatorConfig::from_json_str(r#"{ "disabled_rules": ["NOT_A_RULE"] }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_depth": 16 }}"#).unwrap();
        let config = ValidatorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_depth, 16);

        let missing = ValidatorConfig::from_json_file("/definitely/not/here.json");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
