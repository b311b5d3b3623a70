//! Dispatch configuration.
//!
//! ```yaml
//! api_root: api
//! chain_separator: "|"
//! escalate_failures: false
//! executables:
//!   cat: /bin/cat
//! process:
//!   log_dir: /var/log/conduit
//!   log_prefix: commands
//!   timeout_ms: 5000
//! ```
//!
//! Every field is optional. [`DispatchConfig::load`] picks the format from the
//! file extension (`.yaml`/`.yml` or `.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use conduit_pipe::{DailyLog, ProcessInvoker};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported config format: {0} (expected .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),
}

/// Top-level dispatch settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Prepended to bare command tokens.
    pub api_root: String,
    pub chain_separator: String,
    /// First path segment that selects an external executable.
    pub cli_prefix: String,
    /// Method used for single-segment tokens.
    pub default_method: String,
    /// `cli/<name>` → executable path.
    pub executables: BTreeMap<String, PathBuf>,
    /// Make the default error sink stop the cycle at the first failure.
    pub escalate_failures: bool,
    pub process: ProcessConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_root: String::new(),
            chain_separator: "|".to_string(),
            cli_prefix: "cli".to_string(),
            default_method: "index".to_string(),
            executables: BTreeMap::new(),
            escalate_failures: false,
            process: ProcessConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Reads a config file; the extension selects the format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse: fn(&str) -> Result<Self, ConfigError> = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str,
            Some("json") => Self::from_json_str,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse(&source)
    }
}

/// External process settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Directory for the daily stderr log; stderr is discarded when unset.
    pub log_dir: Option<PathBuf>,
    pub log_prefix: String,
    /// Script sourced before each command (runs through the shell).
    pub shell_profile: Option<String>,
    pub timeout_ms: Option<u64>,
    pub poll_interval_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_prefix: "conduit".to_string(),
            shell_profile: None,
            timeout_ms: None,
            poll_interval_ms: 50,
        }
    }
}

impl ProcessConfig {
    /// Builds the invoker these settings describe.
    pub fn invoker(&self) -> ProcessInvoker {
        let mut invoker =
            ProcessInvoker::new().with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        if let Some(dir) = &self.log_dir {
            invoker = invoker.with_log(DailyLog::new(dir, self.log_prefix.clone()));
        }
        if let Some(profile) = &self.shell_profile {
            invoker = invoker.with_shell_profile(profile.clone());
        }
        if let Some(ms) = self.timeout_ms {
            invoker = invoker.with_timeout(Duration::from_millis(ms));
        }
        invoker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.chain_separator, "|");
        assert_eq!(config.cli_prefix, "cli");
        assert!(config.api_root.is_empty());
        assert!(!config.escalate_failures);
        assert_eq!(config.process.poll_interval_ms, 50);
    }

    #[test]
    fn test_yaml_partial() {
        let config = DispatchConfig::from_yaml_str(
            "api_root: api\nexecutables:\n  cat: /bin/cat\nprocess:\n  timeout_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.api_root, "api");
        assert_eq!(config.executables["cat"], PathBuf::from("/bin/cat"));
        assert_eq!(config.process.timeout_ms, Some(250));
        assert_eq!(config.process.log_prefix, "conduit");
        assert_eq!(config.chain_separator, "|");
    }

    #[test]
    fn test_json() {
        let config =
            DispatchConfig::from_json_str(r#"{"escalate_failures": true, "cli_prefix": "bin"}"#)
                .unwrap();
        assert!(config.escalate_failures);
        assert_eq!(config.cli_prefix, "bin");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            DispatchConfig::from_yaml_str("api_rot: api\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.yml");
        writeln!(fs::File::create(&path).unwrap(), "api_root: v1").unwrap();
        assert_eq!(DispatchConfig::load(&path).unwrap().api_root, "v1");

        let toml = dir.path().join("dispatch.toml");
        assert!(matches!(
            DispatchConfig::load(&toml),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            DispatchConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
