//! Caller-facing execution results.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Message returned to callers for failures that are not their fault.
pub const SYSTEM_ERROR_MESSAGE: &str = "Internal server error";

/// Exactly one of these is attached to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The entry point returned an acceptable mapping.
    Success,
    /// Disallowed import or unparsable source; nothing was spawned.
    ValidationRejected,
    /// The process exceeded its time budget and was killed.
    Timeout,
    /// The process exited with a failure code.
    NonZeroExit,
    /// The process exited cleanly without producing a result.
    ResultMissing,
    /// The result file could not be decoded as a mapping.
    SerializationError,
    /// A string in the result contains a line break.
    ContentPolicyViolation,
    /// Host-side failure unrelated to the script.
    SystemError,
}

impl Classification {
    /// Stable snake_case name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::ValidationRejected => "validation_rejected",
            Classification::Timeout => "timeout",
            Classification::NonZeroExit => "non_zero_exit",
            Classification::ResultMissing => "result_missing",
            Classification::SerializationError => "serialization_error",
            Classification::ContentPolicyViolation => "content_policy_violation",
            Classification::SystemError => "system_error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only value that outlives the pipeline.
///
/// `result` is set only for [`Classification::Success`]; `message` is set
/// for every other classification and is safe to show to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Which taxonomy member this execution landed in.
    pub classification: Classification,
    /// The entry point's return value.
    pub result: Option<Map<String, Value>>,
    /// Captured stdout, returned for diagnostics on every path.
    pub stdout: String,
    /// Caller-facing explanation of a failure.
    pub message: Option<String>,
    /// Raw diagnostic text (usually stderr); kept for logs.
    pub diagnostic: Option<String>,
}

impl ExecutionOutcome {
    /// A successful execution.
    pub fn success(result: Map<String, Value>, stdout: String) -> Self {
        Self {
            classification: Classification::Success,
            result: Some(result),
            stdout,
            message: None,
            diagnostic: None,
        }
    }

    /// A failed execution.
    pub fn failure(
        classification: Classification,
        message: impl Into<String>,
        stdout: String,
        diagnostic: Option<String>,
    ) -> Self {
        debug_assert_ne!(classification, Classification::Success);
        Self {
            classification,
            result: None,
            stdout,
            message: Some(message.into()),
            diagnostic,
        }
    }

    /// An opaque host-side failure. Nothing about the host leaks out.
    pub fn system_error() -> Self {
        Self::failure(
            Classification::SystemError,
            SYSTEM_ERROR_MESSAGE,
            String::new(),
            None,
        )
    }

    /// Check if the execution was successful.
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }

    /// The caller-facing error message, empty on success.
    pub fn error_message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}
