//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ColcalcError, Result};

/// Default maximum nesting depth accepted by the sandbox.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// Default sentinel written into numeric, date and timestamp error rows.
pub const DEFAULT_ERROR_SENTINEL: i64 = -1;

/// Default prefix of the diagnostic text written into string error rows.
pub const DEFAULT_STRING_ERROR_PREFIX: &str = "#ERROR: ";

/// Configuration for expression compilation and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting depth of a compiled program.
    pub max_nesting_depth: usize,
    /// Sentinel stored in numeric, date and timestamp rows that failed to evaluate.
    pub error_sentinel: i64,
    /// Prefix of the diagnostic stored in string rows that failed to evaluate.
    pub string_error_prefix: String,
    /// Whether non-aggregate registry functions are callable from expressions.
    pub registry_wrappers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            error_sentinel: DEFAULT_ERROR_SENTINEL,
            string_error_prefix: DEFAULT_STRING_ERROR_PREFIX.to_string(),
            registry_wrappers: true,
        }
    }
}

impl EngineConfig {
    /// Creates a new engine configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Sets the numeric error sentinel.
    #[must_use]
    pub fn with_error_sentinel(mut self, sentinel: i64) -> Self {
        self.error_sentinel = sentinel;
        self
    }

    /// Sets the string error prefix.
    #[must_use]
    pub fn with_string_error_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.string_error_prefix = prefix.into();
        self
    }

    /// Enables or disables registry function wrappers.
    #[must_use]
    pub fn with_registry_wrappers(mut self, enabled: bool) -> Self {
        self.registry_wrappers = enabled;
        self
    }

    /// Parses a JSON configuration document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| ColcalcError::Config(format!("invalid config document: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the nesting depth is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_nesting_depth == 0 {
            return Err(ColcalcError::Config(
                "max_nesting_depth must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_nesting_depth, 100);
        assert_eq!(config.error_sentinel, -1);
        assert!(config.registry_wrappers);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"max_nesting_depth": 12}"#).unwrap();
        assert_eq!(config.max_nesting_depth, 12);
        assert_eq!(config.string_error_prefix, DEFAULT_STRING_ERROR_PREFIX);
    }

    #[test]
    fn test_from_json_rejects_zero_depth() {
        let err = EngineConfig::from_json(r#"{"max_nesting_depth": 0}"#).unwrap_err();
        assert!(matches!(err, ColcalcError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_error_sentinel(-999)
            .with_registry_wrappers(false);
        assert_eq!(config.error_sentinel, -999);
        assert!(!config.registry_wrappers);
    }
}
