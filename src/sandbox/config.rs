//! Sandbox configuration with builder pattern and YAML loading.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::error::{Result, SandboxError};

/// Modules a script may import when no allow-set is configured.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "bisect",
    "collections",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "fractions",
    "functools",
    "heapq",
    "itertools",
    "json",
    "math",
    "numpy",
    "operator",
    "pandas",
    "random",
    "re",
    "statistics",
    "string",
    "textwrap",
    "time",
    "typing",
];

/// Default grace period granted to pipe readers after a kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Default cap on bytes kept from each of stdout and stderr.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default cap on the size of the result file.
pub const DEFAULT_MAX_RESULT_BYTES: u64 = 4 * 1024 * 1024;

/// Process-wide, read-only configuration for confined execution.
///
/// Built once at start-up and shared by reference; nothing mutates it
/// afterwards, so concurrent executions read it without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Path to the confinement binary (nsjail).
    pub binary_path: PathBuf,
    /// Path to the confinement policy file passed via `--config`.
    pub config_path: PathBuf,
    /// Interpreter executed inside the jail.
    pub python_path: PathBuf,
    /// Wall-clock budget for one execution.
    pub timeout: Duration,
    /// Top-level modules a script may import.
    pub allowed_modules: BTreeSet<String>,
    /// Directory holding the per-execution script and result files.
    pub artifact_dir: PathBuf,
    /// How long to wait for console pipes to drain after a forced kill.
    pub kill_grace: Duration,
    /// Bytes kept from each console stream; the rest is read and dropped.
    pub max_output_bytes: usize,
    /// Largest result file accepted from the confined process.
    pub max_result_bytes: u64,
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }
}

/// Builder for creating SandboxConfig instances.
///
/// [`build`](Self::build) fails fast when a required launch setting is
/// absent or empty.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    binary_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    python_path: Option<PathBuf>,
    timeout: Option<Duration>,
    allowed_modules: Option<BTreeSet<String>>,
    artifact_dir: Option<PathBuf>,
    kill_grace: Option<Duration>,
    max_output_bytes: Option<usize>,
    max_result_bytes: Option<u64>,
}

impl SandboxConfigBuilder {
    /// Set the confinement binary path.
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Set the confinement policy path.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set the interpreter path used inside the jail.
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = Some(path.into());
        self
    }

    /// Set the maximum execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the allow-set of importable modules.
    pub fn allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    /// Set the directory for execution artifacts.
    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Set the pipe-drain grace period used after a forced kill.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = Some(grace);
        self
    }

    /// Set how many bytes of each console stream are kept.
    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = Some(limit);
        self
    }

    /// Set the largest accepted result file.
    pub fn max_result_bytes(mut self, limit: u64) -> Self {
        self.max_result_bytes = Some(limit);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> Result<SandboxConfig> {
        let binary_path = require_path(self.binary_path, "binary_path")?;
        let config_path = require_path(self.config_path, "config_path")?;
        let python_path = require_path(self.python_path, "python_path")?;
        let timeout = self
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .ok_or(SandboxError::LaunchMisconfigured { key: "timeout" })?;

        let allowed_modules = self.allowed_modules.unwrap_or_else(|| {
            DEFAULT_ALLOWED_MODULES
                .iter()
                .map(|module| (*module).to_string())
                .collect()
        });

        Ok(SandboxConfig {
            binary_path,
            config_path,
            python_path,
            timeout,
            allowed_modules,
            artifact_dir: self.artifact_dir.unwrap_or_else(std::env::temp_dir),
            kill_grace: self.kill_grace.unwrap_or(DEFAULT_KILL_GRACE),
            max_output_bytes: self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES),
            max_result_bytes: self.max_result_bytes.unwrap_or(DEFAULT_MAX_RESULT_BYTES),
        })
    }
}

fn require_path(path: Option<PathBuf>, key: &'static str) -> Result<PathBuf> {
    path.filter(|path| !path.as_os_str().is_empty())
        .ok_or(SandboxError::LaunchMisconfigured { key })
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level directive (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Full service configuration as loaded from `application.yaml`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Confinement settings.
    pub sandbox: SandboxConfig,
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate the configuration file at `path`.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SandboxError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: RawAppConfig = serde_yaml::from_str(contents)?;
        let nsjail = raw.nsjail.unwrap_or_default();

        let mut builder = SandboxConfig::builder();
        if let Some(path) = nsjail.binary_path {
            builder = builder.binary_path(path);
        }
        if let Some(path) = nsjail.config_path {
            builder = builder.config_path(path);
        }
        if let Some(path) = nsjail.python_path {
            builder = builder.python_path(path);
        }
        if let Some(TimeoutSecs(secs)) = nsjail.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(dir) = nsjail.artifact_dir {
            builder = builder.artifact_dir(dir);
        }
        if let Some(ms) = nsjail.kill_grace_ms {
            builder = builder.kill_grace(Duration::from_millis(ms));
        }
        if let Some(limit) = nsjail.max_output_bytes {
            builder = builder.max_output_bytes(limit);
        }
        if let Some(limit) = nsjail.max_result_bytes {
            builder = builder.max_result_bytes(limit);
        }
        if let Some(modules) = raw.app.and_then(|app| app.allowed_modules) {
            builder = builder.allowed_modules(modules);
        }

        Ok(Self {
            sandbox: builder.build()?,
            server: raw.server,
            logging: raw.logging,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawAppConfig {
    nsjail: Option<RawNsjailSection>,
    app: Option<RawAppSection>,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawNsjailSection {
    binary_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    python_path: Option<PathBuf>,
    #[serde(alias = "time_limit")]
    timeout: Option<TimeoutSecs>,
    artifact_dir: Option<PathBuf>,
    kill_grace_ms: Option<u64>,
    max_output_bytes: Option<usize>,
    max_result_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAppSection {
    allowed_modules: Option<Vec<String>>,
}

/// Whole seconds, accepted as a YAML integer or a numeric string.
#[derive(Debug, Clone, Copy)]
struct TimeoutSecs(u64);

impl<'de> Deserialize<'de> for TimeoutSecs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SecsVisitor;

        impl Visitor<'_> for SecsVisitor {
            type Value = TimeoutSecs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a whole number of seconds")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<TimeoutSecs, E> {
                Ok(TimeoutSecs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<TimeoutSecs, E> {
                u64::try_from(v)
                    .map(TimeoutSecs)
                    .map_err(|_| E::custom("timeout must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TimeoutSecs, E> {
                v.trim()
                    .parse()
                    .map(TimeoutSecs)
                    .map_err(|_| E::custom(format!("invalid timeout `{v}`")))
            }
        }

        deserializer.deserialize_any(SecsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_builder() -> SandboxConfigBuilder {
        SandboxConfig::builder()
            .binary_path("/usr/bin/nsjail")
            .config_path("/etc/nsjail.cfg")
            .python_path("/usr/bin/python3")
            .timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_builder() {
        let config = complete_builder()
            .allowed_modules(["math", "json"])
            .artifact_dir("/var/tmp")
            .build()
            .unwrap();

        assert_eq!(config.binary_path, PathBuf::from("/usr/bin/nsjail"));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.allowed_modules.len(), 2);
        assert!(config.allowed_modules.contains("math"));
        assert!(!config.allowed_modules.contains("socket"));
        assert_eq!(config.artifact_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.kill_grace, DEFAULT_KILL_GRACE);
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(config.max_result_bytes, DEFAULT_MAX_RESULT_BYTES);
    }

    #[test]
    fn test_builder_defaults_allow_set() {
        let config = complete_builder().build().unwrap();
        assert!(config.allowed_modules.contains("json"));
        assert!(config.allowed_modules.contains("time"));
        assert!(!config.allowed_modules.contains("os"));
        assert!(!config.allowed_modules.contains("subprocess"));
    }

    #[test]
    fn test_builder_fails_fast_on_missing_keys() {
        let err = SandboxConfig::builder()
            .config_path("/etc/nsjail.cfg")
            .python_path("/usr/bin/python3")
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::LaunchMisconfigured { key: "binary_path" }));

        let err = complete_builder().python_path("").build().unwrap_err();
        assert!(matches!(err, SandboxError::LaunchMisconfigured { key: "python_path" }));

        let err = complete_builder().timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, SandboxError::LaunchMisconfigured { key: "timeout" }));
    }

    #[test]
    fn test_yaml_full_document() {
        let yaml = r#"
nsjail:
  binary_path: /usr/bin/nsjail
  config_path: /etc/nsjail.cfg
  python_path: /usr/bin/python3
  time_limit: "10"
  artifact_dir: /srv/artifacts
  kill_grace_ms: 250
  max_output_bytes: 65536
  max_result_bytes: 1024
app:
  allowed_modules: [math, json, numpy]
server:
  port: 9090
logging:
  level: debug
  format: json
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.sandbox.timeout, Duration::from_secs(10));
        assert_eq!(config.sandbox.kill_grace, Duration::from_millis(250));
        assert_eq!(config.sandbox.max_output_bytes, 65536);
        assert_eq!(config.sandbox.max_result_bytes, 1024);
        assert_eq!(config.sandbox.artifact_dir, PathBuf::from("/srv/artifacts"));
        assert!(config.sandbox.allowed_modules.contains("numpy"));
        assert!(!config.sandbox.allowed_modules.contains("time"));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_yaml_numeric_timeout() {
        let yaml = r#"
nsjail:
  binary_path: /usr/bin/nsjail
  config_path: /etc/nsjail.cfg
  python_path: /usr/bin/python3
  timeout: 3
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.sandbox.timeout, Duration::from_secs(3));
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_yaml_missing_section_is_misconfigured() {
        let err = AppConfig::from_yaml_str("server:\n  port: 8080\n").unwrap_err();
        assert!(matches!(err, SandboxError::LaunchMisconfigured { key: "binary_path" }));
    }

    #[test]
    fn test_yaml_missing_timeout_is_misconfigured() {
        let yaml = r#"
nsjail:
  binary_path: /usr/bin/nsjail
  config_path: /etc/nsjail.cfg
  python_path: /usr/bin/python3
"#;
        let err = AppConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SandboxError::LaunchMisconfigured { key: "timeout" }));
    }

    #[test]
    fn test_yaml_invalid_document() {
        let err = AppConfig::from_yaml_str("nsjail: [unclosed").unwrap_err();
        assert!(matches!(err, SandboxError::ConfigParse(_)));

        let err = AppConfig::from_yaml_str("nsjail:\n  timeout: soon\n").unwrap_err();
        assert!(matches!(err, SandboxError::ConfigParse(_)));
    }

    #[test]
    fn test_bundled_application_yaml_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("application.yaml");
        let config = AppConfig::from_yaml_file(path).unwrap();
        assert_eq!(config.sandbox.timeout, Duration::from_secs(10));
        assert!(config.sandbox.allowed_modules.contains("math"));
        assert!(!config.sandbox.allowed_modules.contains("os"));
    }

    #[test]
    fn test_yaml_file_not_found() {
        let err = AppConfig::from_yaml_file("/nonexistent/application.yaml").unwrap_err();
        assert!(matches!(err, SandboxError::ConfigLoad { .. }));
    }
}
