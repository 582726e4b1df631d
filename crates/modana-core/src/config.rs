//! Core configuration.
//!
//! Defaults live in [`defaults`], environment variable names in [`env_vars`].
//! A configuration is read from TOML and can then be overridden from the
//! environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default values.
pub mod defaults {
    /// Maximum nesting of re-entrant dispatches (publish inside a handler, ...).
    pub const MAX_DISPATCH_DEPTH: usize = 32;
    /// Whether the command registry publishes registered/unregistered events.
    pub const EMIT_COMMAND_EVENTS: bool = true;
}

/// Environment variable names.
pub mod env_vars {
    /// Extension directories, separated like `PATH`.
    pub const EXTENSION_DIRS: &str = "MODANA_EXTENSION_DIRS";
    /// Override for `max_dispatch_depth`.
    pub const MAX_DISPATCH_DEPTH: &str = "MODANA_MAX_DISPATCH_DEPTH";
    /// Comma-separated extension names that must not be initialized.
    pub const DISABLED_EXTENSIONS: &str = "MODANA_DISABLED_EXTENSIONS";
    /// Set to `true` for JSON log output (read by the shell binary).
    pub const LOG_JSON: &str = "MODANA_LOG_JSON";
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of the core services and the extension manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directories scanned for native extension modules.
    pub extension_dirs: Vec<PathBuf>,
    /// Extensions that are discovered but never initialized.
    pub disabled_extensions: Vec<String>,
    pub max_dispatch_depth: usize,
    pub emit_command_events: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            extension_dirs: Vec::new(),
            disabled_extensions: Vec::new(),
            max_dispatch_depth: defaults::MAX_DISPATCH_DEPTH,
            emit_command_events: defaults::EMIT_COMMAND_EVENTS,
        }
    }
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded core configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Directories from the environment are appended after the configured ones.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dirs) = lookup(env_vars::EXTENSION_DIRS) {
            self.extension_dirs
                .extend(std::env::split_paths(&dirs).filter(|p| !p.as_os_str().is_empty()));
        }

        if let Some(depth) = lookup(env_vars::MAX_DISPATCH_DEPTH) {
            self.max_dispatch_depth = depth.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{} must be a positive integer, got {:?}",
                    env_vars::MAX_DISPATCH_DEPTH,
                    depth
                ))
            })?;
        }

        if let Some(disabled) = lookup(env_vars::DISABLED_EXTENSIONS) {
            self.disabled_extensions.extend(
                disabled
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            );
        }

        self.validate()?;
        Ok(self)
    }

    pub fn with_extension_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extension_dirs.push(dir.into());
        self
    }

    pub fn with_disabled(mut self, name: impl Into<String>) -> Self {
        self.disabled_extensions.push(name.into());
        self
    }

    pub fn with_max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth;
        self
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_extensions.iter().any(|d| d == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dispatch_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_dispatch_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert!(config.extension_dirs.is_empty());
        assert_eq!(config.max_dispatch_depth, defaults::MAX_DISPATCH_DEPTH);
        assert!(config.emit_command_events);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            extension_dirs = ["/opt/modana/extensions"]
            disabled_extensions = ["legacy-viewer"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.extension_dirs,
            vec![PathBuf::from("/opt/modana/extensions")]
        );
        assert!(config.is_disabled("legacy-viewer"));
        assert!(!config.is_disabled("surface-viewer"));
        assert_eq!(config.max_dispatch_depth, defaults::MAX_DISPATCH_DEPTH);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = CoreConfig::from_toml_str("max_dispatch_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, String> = HashMap::from([
            (env_vars::MAX_DISPATCH_DEPTH, "8".to_string()),
            (env_vars::DISABLED_EXTENSIONS, "a, b,,".to_string()),
        ]);

        let config = CoreConfig::default()
            .apply_env_from(|key| vars.get(key).cloned())
            .unwrap();

        assert_eq!(config.max_dispatch_depth, 8);
        assert_eq!(config.disabled_extensions, vec!["a", "b"]);
    }

    #[test]
    fn test_env_invalid_depth() {
        let result = CoreConfig::default().apply_env_from(|key| {
            (key == env_vars::MAX_DISPATCH_DEPTH).then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
