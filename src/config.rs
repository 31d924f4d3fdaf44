//! View engine configuration.
//!
//! Hosts usually build a [`ViewConfig`] in code, but it can also be loaded from
//! JSON; every key is optional and falls back to its default.
//!
//! ```
//! use liverows::ViewConfig;
//!
//! let config = ViewConfig::from_json(r#"{ "max_sort_fields": 2, "value_changed_duration_ms": 0 }"#).unwrap();
//! assert_eq!(config.max_sort_fields, 2);
//! assert_eq!(config.value_changed_duration_ms, 0);
//! assert!(config.continuous_filtering);
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default number of sort keys kept by `sort_by`
pub const DEFAULT_MAX_SORT_FIELDS: usize = 3;
/// Default lifetime of a recent change highlight
pub const DEFAULT_RECENT_CHANGE_DURATION_MS: u64 = 1000;
/// Default neighbour scan distance for `find_insert_row_index`
pub const DEFAULT_FIND_INSERT_SCAN_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Maximum number of sort field specifiers (first is the primary key)
    pub max_sort_fields: usize,
    /// Re-evaluate filter membership on every record mutation
    pub continuous_filtering: bool,
    /// Lifetime of a "record inserted" highlight; 0 disables it
    pub record_inserted_duration_ms: u64,
    /// Lifetime of a "record updated" highlight; 0 disables it
    pub record_updated_duration_ms: u64,
    /// Lifetime of a cell value highlight; 0 disables it
    pub value_changed_duration_ms: u64,
    /// Run the O(n) consistency oracle when the outermost change bracket closes
    pub check_consistency: bool,
    /// How far `find_insert_row_index` walks before falling back to an extreme
    pub find_insert_scan_limit: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            max_sort_fields: DEFAULT_MAX_SORT_FIELDS,
            continuous_filtering: true,
            record_inserted_duration_ms: DEFAULT_RECENT_CHANGE_DURATION_MS,
            record_updated_duration_ms: DEFAULT_RECENT_CHANGE_DURATION_MS,
            value_changed_duration_ms: DEFAULT_RECENT_CHANGE_DURATION_MS,
            check_consistency: false,
            find_insert_scan_limit: DEFAULT_FIND_INSERT_SCAN_LIMIT,
        }
    }
}

impl ViewConfig {
    /// Parse a config from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ViewConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sort_fields == 0 {
            return Err(ConfigError::Invalid(
                "max_sort_fields must be at least 1".to_string(),
            ));
        }
        if self.find_insert_scan_limit == 0 {
            return Err(ConfigError::Invalid(
                "find_insert_scan_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style toggle for the consistency oracle
    pub fn with_consistency_checks(mut self, enabled: bool) -> Self {
        self.check_consistency = enabled;
        self
    }
}
