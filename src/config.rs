//! Pass configuration, read from TOML.
//!
//! ```toml
//! whitelist = ["malloc", "printf"]   # externals known not to free memory
//! insert_call_checks = true          # check pointers passed to calls first
//!
//! [checks]
//! ptr = "MMPtrKeyCheck"
//! array_ptr = "MMArrayPtrKeyCheck"
//! ```
//!
//! Every key is optional.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// External procedures that never free memory, and so never invalidate a key
pub const DEFAULT_WHITELIST: &[&str] = &[
    "malloc",
    "mm_alloc",
    "mm_array_alloc",
    "printf",
    "abort",
    "exit",
    "srand",
    "atoi",
    "atol",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub whitelist: BTreeSet<String>,
    pub checks: CheckNames,
    pub insert_call_checks: bool,
}

/// Names of the procedures that test a guarded pointer's key
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckNames {
    pub ptr: String,
    pub array_ptr: String,
}

impl Default for CheckNames {
    fn default() -> Self {
        CheckNames {
            ptr: "MMPtrKeyCheck".to_string(),
            array_ptr: "MMArrayPtrKeyCheck".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            whitelist: DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect(),
            checks: CheckNames::default(),
            insert_call_checks: false,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_toml(&s)
    }

    /// Whether a call to the external `name` is known not to invalidate.
    /// The check functions themselves always qualify.
    pub fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist.contains(name) || self.checks.ptr == name || self.checks.array_ptr == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn whitelist_replaces_default() {
        let config = Config::from_toml(r#"whitelist = ["my_alloc"]"#).unwrap();
        assert!(config.is_whitelisted("my_alloc"));
        assert!(!config.is_whitelisted("malloc"));
        assert!(config.is_whitelisted("MMPtrKeyCheck"));
    }

    #[test]
    fn partial_checks_table() {
        let config = Config::from_toml("[checks]\nptr = \"check\"\n").unwrap();
        assert_eq!(config.checks.ptr, "check");
        assert_eq!(config.checks.array_ptr, "MMArrayPtrKeyCheck");
        assert!(!config.insert_call_checks);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(Config::from_toml("whitelst = []"), Err(ConfigError::Toml(_))));
        assert!(Config::from_toml("[checks]\nfoo = \"x\"").is_err());
    }
}
