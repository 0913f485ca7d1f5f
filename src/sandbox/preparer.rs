//! Turns a validated script into a runnable program.
//!
//! The user's source is left untouched and a fixed epilogue is appended. The
//! epilogue calls the entry point, checks that it returned a mapping, and
//! writes that mapping as JSON to the result channel. Everything else it has
//! to say goes to stderr, prefixed with a marker that is unique to the
//! prepared program (see [`PreparedScript::marker`]).

use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, SandboxError};

/// Name of the zero-argument callable every script must define.
pub const ENTRY_POINT: &str = "main";

/// Tag shared by every epilogue marker; a per-program nonce follows it.
pub const MARKER_TAG: &str = "sandbox-error";

/// Exit code the epilogue uses when the entry point raises.
pub const ENTRY_POINT_FAILED_EXIT: i32 = 1;

const EPILOGUE: &str = r#"

def _sandbox_run_entry_point(result_path):
    import json
    import sys
    import traceback

    def non_str_key(value):
        if isinstance(value, dict):
            return any(not isinstance(k, str) or non_str_key(v) for k, v in value.items())
        if isinstance(value, (list, tuple)):
            return any(non_str_key(v) for v in value)
        return False

    entry = globals().get("{entry}")
    if not callable(entry):
        print("{marker} no callable {entry}() found", file=sys.stderr)
        return 0
    try:
        result = entry()
    except Exception as exc:
        print("{marker} {entry}() raised " + type(exc).__name__, file=sys.stderr)
        traceback.print_exc()
        return {failed}
    if not isinstance(result, dict):
        print("{marker} {entry}() must return a dict, got " + type(result).__name__, file=sys.stderr)
        return 0
    try:
        payload = json.dumps(result, allow_nan=False)
    except (TypeError, ValueError, RecursionError) as exc:
        print("{marker} {entry}() returned a value that is not JSON serializable: " + str(exc), file=sys.stderr)
        return 0
    if non_str_key(result):
        print("{marker} {entry}() returned a mapping with a non-string key", file=sys.stderr)
        return 0
    with open(result_path, "w", encoding="utf-8") as handle:
        handle.write(payload)
    return 0


raise SystemExit(_sandbox_run_entry_point({result_path}))
"#;

/// Source text ready to be written to the script artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScript {
    source: String,
    marker: String,
}

impl PreparedScript {
    /// The full program text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Prefix of the diagnostic lines this program's epilogue writes.
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

/// Appends the entry-point epilogue to validated scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptPreparer;

impl ScriptPreparer {
    /// Create a preparer.
    pub fn new() -> Self {
        Self
    }

    /// Build the runnable program for `source`, reporting its return value
    /// through `result_path`.
    pub fn prepare(&self, source: &str, result_path: &Path) -> Result<PreparedScript> {
        let path = result_path.to_str().ok_or_else(|| {
            SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("result path {} is not valid UTF-8", result_path.display()),
            ))
        })?;
        // A JSON string is also a valid Python string literal.
        let literal = serde_json::to_string(path).map_err(std::io::Error::other)?;
        let marker = format!("[{MARKER_TAG} {}]", Uuid::new_v4().simple());

        let epilogue = EPILOGUE
            .replace("{entry}", ENTRY_POINT)
            .replace("{marker}", &marker)
            .replace("{failed}", &ENTRY_POINT_FAILED_EXIT.to_string())
            .replace("{result_path}", &literal);

        let mut program = String::with_capacity(source.len() + epilogue.len() + 1);
        program.push_str(source);
        if !source.is_empty() && !source.ends_with('\n') {
            program.push('\n');
        }
        program.push_str(&epilogue);

        Ok(PreparedScript {
            source: program,
            marker,
        })
    }
}
