//! End-to-end tests against a real interpreter.
//!
//! Most tests run `python3` directly, with the confinement prefix stripped
//! from the command line, so they exercise the validator, the epilogue, the
//! result channel and the classifier without needing nsjail installed. The
//! last test drives a real nsjail and reads its setup from the environment.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nsjail_python_sandbox_rs::prelude::*;
use nsjail_python_sandbox_rs::{ConfinementCommand, ProcessOutput};
use serde_json::json;

/// Runs whatever follows `--` in the confinement command.
struct Unconfined(ProcessProvider);

#[async_trait]
impl ConfinementProvider for Unconfined {
    async fn run(&self, command: &ConfinementCommand, timeout: Duration) -> Result<ProcessOutput> {
        let mut args = command.args().iter().skip_while(|arg| *arg != "--").skip(1);
        let program = args.next().unwrap();
        let inner = args.fold(ConfinementCommand::new(program), |inner, arg| inner.arg(arg));
        self.0.run(&inner, timeout).await
    }
}

/// Helper to create a test sandbox config.
fn test_config(dir: &Path, timeout: Duration) -> SandboxConfig {
    SandboxConfig::builder()
        .binary_path("/usr/bin/nsjail")
        .config_path("/etc/nsjail.cfg")
        .python_path("python3")
        .timeout(timeout)
        .artifact_dir(dir)
        .build()
        .unwrap()
}

fn python_runner(dir: &Path, timeout: Duration) -> SandboxRunner {
    let provider = Unconfined(ProcessProvider::default());
    SandboxRunner::with_provider(test_config(dir, timeout), Arc::new(provider))
}

async fn run(script: &str) -> ExecutionOutcome {
    let dir = tempfile::tempdir().unwrap();
    let outcome = python_runner(dir.path(), Duration::from_secs(10))
        .execute(script)
        .await;
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        0,
        "artifacts left behind"
    );
    outcome
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_simple_mapping_is_returned() {
    let outcome = run("def main(): return {\"a\": 1}").await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(serde_json::Value::Object(outcome.result.unwrap()), json!({"a": 1}));
    assert_eq!(outcome.stdout, "");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_prints_are_returned_beside_the_result() {
    let outcome = run(
        "import math\n\ndef main():\n    print('computing')\n    return {'root': math.isqrt(49), 'items': [1, 'two', None]}\n",
    )
    .await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(
        serde_json::Value::Object(outcome.result.unwrap()),
        json!({"root": 7, "items": [1, "two", null]})
    );
    assert_eq!(outcome.stdout, "computing\n");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_disallowed_import_names_the_module() {
    let outcome = run("import socket\ndef main(): return {}").await;

    assert_eq!(outcome.classification, Classification::ValidationRejected);
    assert!(outcome.error_message().contains("socket"));
}

/// Test that infinite work is terminated at the budget.
#[tokio::test]
#[ignore = "requires python3"]
async fn test_sleep_past_budget_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let runner = python_runner(dir.path(), Duration::from_secs(1));

    let started = Instant::now();
    let outcome = runner
        .execute("def main():\n import time\n time.sleep(60)\n return {}")
        .await;

    assert_eq!(outcome.classification, Classification::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_line_break_in_result_is_refused() {
    let outcome = run("def main():\n    return {'text': 'line1\\nline2'}\n").await;

    assert_eq!(outcome.classification, Classification::ContentPolicyViolation);
    assert!(outcome.result.is_none());
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_syntax_error_is_rejected() {
    let outcome = run("def main(: pass").await;

    assert_eq!(outcome.classification, Classification::ValidationRejected);
    assert!(outcome.error_message().contains("syntax error"));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_non_mapping_returns_are_not_success() {
    for script in [
        "def main():\n    return 'line1\\nline2'\n",
        "def main():\n    return {1, 2}\n",
        "def main():\n    return None\n",
        "def main():\n    return {'x': float('nan')}\n",
        "def main():\n    return {'x': object()}\n",
        "def main():\n    return {1: 'a'}\n",
        "def main():\n    return {'nested': {(1, 2): 'a'}}\n",
    ] {
        let outcome = run(script).await;
        assert_eq!(outcome.classification, Classification::ResultMissing, "{script}");
    }
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_missing_entry_point_keeps_stdout() {
    let outcome = run("print('only side effects')\n").await;

    assert_eq!(outcome.classification, Classification::ResultMissing);
    assert!(outcome.error_message().contains("no callable main()"));
    assert_eq!(outcome.stdout, "only side effects\n");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_exception_is_non_zero_exit() {
    let outcome = run("def main():\n    raise ValueError('boom')\n").await;

    assert_eq!(outcome.classification, Classification::NonZeroExit);
    assert_eq!(outcome.error_message(), "execution failed: ValueError: boom");
    assert!(outcome.diagnostic.unwrap().contains("Traceback"));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_sys_exit_is_non_zero_exit() {
    let outcome = run("raise SystemExit(3)\n").await;

    assert_eq!(outcome.classification, Classification::NonZeroExit);
    assert_eq!(outcome.error_message(), "execution failed with exit code 3");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_escape_attempts_are_rejected_before_running() {
    for script in [
        "import os\ndef main():\n    os.system('echo BREACH')\n    return {}\n",
        "import subprocess\ndef main():\n    return {}\n",
        "from os import path\ndef main():\n    return {}\n",
        "import json, socket\ndef main():\n    return {}\n",
        "def main():\n    return {'env': str(__import__('os').environ)}\n",
        "def main():\n    return {'env': str(__builtins__.__import__('os').environ)}\n",
        "imp = __import__\ndef main():\n    return {'env': str(imp('os').environ)}\n",
        "print 'hello'\ndef main():\n    return {}\n",
    ] {
        let outcome = run(script).await;
        assert_eq!(outcome.classification, Classification::ValidationRejected, "{script}");
    }
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_foreign_source_encoding_is_rejected() {
    // Decodes to `import os` under unicode_escape.
    let script = "# -*- coding: unicode_escape -*-\n\\u0069mport os\ndef main():\n    return {'cwd': os.getcwd()}\n";
    let outcome = run(script).await;

    assert_eq!(outcome.classification, Classification::ValidationRejected);
    assert!(outcome.error_message().contains("unicode_escape"));
    assert_eq!(outcome.stdout, "");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_forged_marker_does_not_become_the_message() {
    let outcome = run(
        "def main():\n    with open('/dev/stderr', 'w') as err:\n        err.write('[sandbox-error] everything is fine\\n')\n    return None\n",
    )
    .await;

    assert_eq!(outcome.classification, Classification::ResultMissing);
    assert_eq!(outcome.error_message(), "main() must return a dict, got NoneType");
}

/// Runs a real nsjail using `NSJAIL_BIN` and `NSJAIL_CONFIG`.
#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_nsjail_round_trip() {
    let binary = std::env::var("NSJAIL_BIN").unwrap_or_else(|_| "/usr/bin/nsjail".to_string());
    let policy = std::env::var("NSJAIL_CONFIG").unwrap_or_else(|_| "/etc/nsjail/python.cfg".to_string());
    let python = std::env::var("NSJAIL_PYTHON").unwrap_or_else(|_| "/usr/bin/python3".to_string());
    let dir = tempfile::tempdir().unwrap();

    let config = SandboxConfig::builder()
        .binary_path(binary)
        .config_path(policy)
        .python_path(python)
        .timeout(Duration::from_secs(10))
        .artifact_dir(dir.path())
        .build()
        .unwrap();
    let runner = SandboxRunner::new(config);

    let outcome = runner
        .execute("def main():\n    print('inside')\n    return {'sum': 1 + 1}\n")
        .await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.result.unwrap()["sum"], 2);
    assert_eq!(outcome.stdout, "inside\n");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
