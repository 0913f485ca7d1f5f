//! Maps a finished process onto the outcome taxonomy.
//!
//! Rules are applied in a fixed order and the first match wins:
//! timeout, non-zero exit, missing result, undecodable result, line break in
//! result, success. Infrastructure failures therefore always outrank
//! problems with the shape of the answer.

use std::time::Duration;

use crate::error::parse_python_exception;
use crate::sandbox::channel::{mapping_contains_line_break, ChannelContents, ResultChannel};
use crate::sandbox::outcome::{Classification, ExecutionOutcome};
use crate::sandbox::preparer::ENTRY_POINT;
use crate::sandbox::provider::ProcessOutput;

/// Everything observed about one confined run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExecution {
    /// Exit status and console streams.
    pub output: ProcessOutput,
    /// Contents of the result channel.
    pub channel: ChannelContents,
    /// Marker the epilogue of this run prefixes its diagnostics with.
    pub marker: String,
}

/// Assembles the caller-facing outcome from a raw execution.
#[derive(Debug, Clone, Copy)]
pub struct ResponseClassifier {
    timeout: Duration,
}

impl ResponseClassifier {
    /// `timeout` is the budget the run was given; it appears in messages.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Classify one execution.
    pub fn classify(&self, raw: RawExecution) -> ExecutionOutcome {
        let RawExecution {
            output,
            channel,
            marker,
        } = raw;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.timed_out {
            return ExecutionOutcome::failure(
                Classification::Timeout,
                format!("execution timed out after {:?}", self.timeout),
                stdout,
                non_empty(stderr),
            );
        }

        if output.exit_code != 0 {
            let diagnostic = non_empty(stderr).or_else(|| non_empty(stdout.clone()));
            let message = diagnostic
                .as_deref()
                .and_then(parse_python_exception)
                .map(|exc| format!("execution failed: {}", exc.summary()))
                .unwrap_or_else(|| format!("execution failed with exit code {}", output.exit_code));
            return ExecutionOutcome::failure(
                Classification::NonZeroExit,
                message,
                stdout,
                diagnostic,
            );
        }

        let bytes = match channel {
            ChannelContents::Absent => {
                let message = marker_message(&stderr, &marker)
                    .unwrap_or_else(|| format!("{ENTRY_POINT}() did not return a result"));
                return ExecutionOutcome::failure(
                    Classification::ResultMissing,
                    message,
                    stdout,
                    non_empty(stderr),
                );
            }
            ChannelContents::Oversized { limit } => {
                return ExecutionOutcome::failure(
                    Classification::SerializationError,
                    format!("result exceeds the {limit}-byte limit"),
                    stdout,
                    non_empty(stderr),
                );
            }
            ChannelContents::Present(bytes) => bytes,
        };

        let result = match ResultChannel::decode(&bytes) {
            Ok(result) => result,
            Err(e) => {
                return ExecutionOutcome::failure(
                    Classification::SerializationError,
                    e.to_string(),
                    stdout,
                    non_empty(stderr),
                );
            }
        };

        if mapping_contains_line_break(&result) {
            return ExecutionOutcome::failure(
                Classification::ContentPolicyViolation,
                "result contains a string with an embedded line break",
                stdout,
                None,
            );
        }

        ExecutionOutcome::success(result, stdout)
    }
}

/// First epilogue diagnostic in `stderr`, without its marker.
fn marker_message(stderr: &str, marker: &str) -> Option<String> {
    stderr
        .lines()
        .find_map(|line| line.strip_prefix(marker))
        .map(|rest| rest.trim().to_string())
        .filter(|rest| !rest.is_empty())
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
