//! Bridge configuration
//!
//! Loaded from TOML with per-field defaults, then overridden from the
//! environment:
//!
//! ```toml
//! [dispatch]
//! max_arity = 16
//! catch_panics = true
//!
//! [handles]
//! initial_capacity = 64
//!
//! [marshal]
//! check_alignment = true
//!
//! [logging]
//! level = "info"
//! json = false
//! file = "logs/bridge.log"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BridgeError;

/// Path of a TOML file read by [`BridgeConfig::load`]
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";
pub const MAX_ARITY_ENV: &str = "BRIDGE_MAX_ARITY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub handles: HandlesConfig,

    #[serde(default)]
    pub marshal: MarshalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Largest parameter count a thunk may be synthesized for
    #[serde(default = "default_max_arity")]
    pub max_arity: usize,

    /// Report managed panics as faults from `Bridge::invoke` and `Thunk::call`
    ///
    /// When off, a panic unwinds to the Rust caller. The C entry points
    /// always catch it and record a managed fault.
    #[serde(default = "default_true")]
    pub catch_panics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlesConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalConfig {
    #[serde(default = "default_true")]
    pub check_alignment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_max_arity() -> usize {
    16
}

fn default_initial_capacity() -> usize {
    64
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_arity: default_max_arity(),
            catch_panics: true,
        }
    }
}

impl Default for HandlesConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
        }
    }
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self { check_alignment: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, BridgeError> {
        toml::from_str(source).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Apply `BRIDGE_MAX_ARITY`
    pub fn with_env_overrides(mut self) -> Result<Self, BridgeError> {
        if let Ok(raw) = std::env::var(MAX_ARITY_ENV) {
            self.dispatch.max_arity = raw
                .trim()
                .parse()
                .map_err(|_| BridgeError::Config(format!("{} is not a count: {:?}", MAX_ARITY_ENV, raw)))?;
        }
        Ok(self)
    }

    /// File named by `BRIDGE_CONFIG` (defaults otherwise), then environment overrides
    pub fn load() -> Result<Self, BridgeError> {
        let base = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    pub fn to_toml_string(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.dispatch.max_arity, 16);
        assert!(config.dispatch.catch_panics);
        assert_eq!(config.handles.initial_capacity, 64);
        assert!(config.marshal.check_alignment);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [dispatch]
            max_arity = 4

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch.max_arity, 4);
        assert!(config.dispatch.catch_panics);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.handles, HandlesConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(BridgeConfig::from_toml_str("").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        let err = BridgeConfig::from_toml_str("[dispatch]\nmax_arity = \"many\"").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[marshal]\ncheck_alignment = false\n[handles]\ninitial_capacity = 8").unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert!(!config.marshal.check_alignment);
        assert_eq!(config.handles.initial_capacity, 8);

        let missing = BridgeConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BridgeConfig::default();
        config.logging.file = Some(PathBuf::from("logs/bridge.log"));
        let text = config.to_toml_string().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }
}
