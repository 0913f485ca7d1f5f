//! Error types for the Python sandbox.

use std::path::PathBuf;

use thiserror::Error;

/// Infrastructure errors raised while configuring or driving the sandbox.
///
/// Problems caused by the submitted script never surface here; those are
/// reported as [`ExecutionOutcome`](crate::ExecutionOutcome) values.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A required launch setting is absent or empty.
    #[error("sandbox launch misconfigured: `{key}` is missing or empty")]
    LaunchMisconfigured {
        /// The configuration key that failed validation.
        key: &'static str,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    ConfigLoad {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid YAML for the expected schema.
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The Python grammar could not be loaded into the parser.
    #[error("failed to initialise Python parser: {0}")]
    ParserInit(String),

    /// The confinement binary could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to launch.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error while managing execution artifacts or process pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// A Python exception recovered from interpreter stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonException {
    /// The type of Python exception (e.g., "ValueError", "TypeError").
    pub exception_type: String,
    /// The exception message.
    pub message: String,
}

impl PythonException {
    /// One-line `Type: message` summary suitable for callers.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.exception_type.clone()
        } else {
            format!("{}: {}", self.exception_type, self.message)
        }
    }
}

/// Parse a Python exception from stderr output.
///
/// Takes the last unindented line that looks like `ExceptionType: message`;
/// traceback frames are indented and never match.
pub fn parse_python_exception(stderr: &str) -> Option<PythonException> {
    let exception_str = stderr
        .lines()
        .rev()
        .find(|line| !line.starts_with(' ') && looks_like_exception(line))?;

    let (exception_type, message) = match exception_str.split_once(':') {
        Some((exc_type, msg)) => (exc_type.trim().to_string(), msg.trim().to_string()),
        None => (exception_str.trim().to_string(), String::new()),
    };

    Some(PythonException {
        exception_type,
        message,
    })
}

/// Check if a line looks like a Python exception.
fn looks_like_exception(line: &str) -> bool {
    const SUFFIXES: [&str; 3] = ["Error", "Exception", "Warning"];
    const STANDALONE: [&str; 4] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    // Dotted names cover `json.decoder.JSONDecodeError` style exceptions.
    let name = line.split(':').next().unwrap_or_default().trim_end();
    if name.is_empty() || name.contains(' ') {
        return false;
    }
    let Some(last) = name.rsplit('.').next() else {
        return false;
    };
    if !last.starts_with(|c: char| c.is_ascii_uppercase()) {
        return false;
    }
    SUFFIXES.iter().any(|suffix| last.ends_with(suffix)) || STANDALONE.contains(&last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let stderr = "ValueError: invalid literal for int() with base 10: 'abc'";
        let exc = parse_python_exception(stderr).expect("exception");

        assert_eq!(exc.exception_type, "ValueError");
        assert_eq!(exc.message, "invalid literal for int() with base 10: 'abc'");
    }

    #[test]
    fn test_parse_exception_with_traceback() {
        let stderr = r#"Traceback (most recent call last):
  File "/tmp/sandbox-1.py", line 2, in main
    raise ValueError("invalid value")
ValueError: invalid value"#;

        let exc = parse_python_exception(stderr).expect("exception");

        assert_eq!(exc.exception_type, "ValueError");
        assert_eq!(exc.message, "invalid value");
        assert_eq!(exc.summary(), "ValueError: invalid value");
    }

    #[test]
    fn test_parse_exception_no_message() {
        let exc = parse_python_exception("StopIteration").expect("exception");
        assert_eq!(exc.exception_type, "StopIteration");
        assert!(exc.message.is_empty());
        assert_eq!(exc.summary(), "StopIteration");
    }

    #[test]
    fn test_parse_dotted_exception() {
        let exc = parse_python_exception("json.decoder.JSONDecodeError: Expecting value")
            .expect("exception");
        assert_eq!(exc.exception_type, "json.decoder.JSONDecodeError");
        assert_eq!(exc.summary(), "json.decoder.JSONDecodeError: Expecting value");
    }

    #[test]
    fn test_parse_ignores_plain_text() {
        assert!(parse_python_exception("").is_none());
        assert!(parse_python_exception("   ").is_none());
        assert!(parse_python_exception("hello world\nanother line").is_none());
    }
}
