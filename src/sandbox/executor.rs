//! Core execution engine for the Python sandbox.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::sandbox::artifact::ExecutionArtifacts;
use crate::sandbox::channel::ResultChannel;
use crate::sandbox::classifier::{RawExecution, ResponseClassifier};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::outcome::{Classification, ExecutionOutcome};
use crate::sandbox::preparer::ScriptPreparer;
use crate::sandbox::provider::{ConfinementCommand, ConfinementProvider, ProcessProvider};
use crate::sandbox::validator::{StaticValidator, ValidationOutcome};

/// Runs untrusted Python scripts through the full pipeline.
///
/// A runner holds only immutable state, so a single instance can be shared
/// behind an `Arc` and driven from any number of tasks at once. Every call to
/// [`execute`](Self::execute) owns its own artifacts and subprocess.
pub struct SandboxRunner {
    config: Arc<SandboxConfig>,
    provider: Arc<dyn ConfinementProvider>,
    validator: StaticValidator,
    preparer: ScriptPreparer,
}

impl SandboxRunner {
    /// Create a runner that launches the configured confinement binary as a
    /// local child process.
    pub fn new(config: SandboxConfig) -> Self {
        let provider =
            ProcessProvider::new(config.kill_grace).with_output_limit(config.max_output_bytes);
        Self::with_provider(config, Arc::new(provider))
    }

    /// Create a runner backed by a custom confinement provider.
    pub fn with_provider(config: SandboxConfig, provider: Arc<dyn ConfinementProvider>) -> Self {
        let validator = StaticValidator::new(config.allowed_modules.iter().cloned());
        Self {
            config: Arc::new(config),
            provider,
            validator,
            preparer: ScriptPreparer::new(),
        }
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute `script` and classify what happened.
    ///
    /// Never fails: host-side errors are logged and reported as
    /// [`Classification::SystemError`].
    pub async fn execute(&self, script: &str) -> ExecutionOutcome {
        let started = Instant::now();

        let outcome = match self.validator.validate(script) {
            Ok(ValidationOutcome::Allowed) => self.run_validated(script).await,
            Ok(ValidationOutcome::Rejected(rejection)) => {
                tracing::info!(
                    target: "sandbox::request",
                    module = rejection.module.as_deref().unwrap_or_default(),
                    "script rejected by static validation"
                );
                ExecutionOutcome::failure(
                    Classification::ValidationRejected,
                    rejection.to_string(),
                    String::new(),
                    None,
                )
            }
            Err(e) => {
                tracing::error!(target: "sandbox::error", error = %e, "static validation failed");
                ExecutionOutcome::system_error()
            }
        };

        tracing::info!(
            target: "sandbox::result",
            classification = %outcome.classification,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );
        outcome
    }

    async fn run_validated(&self, script: &str) -> ExecutionOutcome {
        let artifacts = ExecutionArtifacts::allocate(&self.config.artifact_dir);
        let execution_id = artifacts.id();

        let outcome = match self.run_confined(script, &artifacts).await {
            Ok(raw) => {
                tracing::debug!(
                    target: "sandbox::result",
                    %execution_id,
                    exit_code = raw.output.exit_code,
                    timed_out = raw.output.timed_out,
                    "confined process exited"
                );
                ResponseClassifier::new(self.config.timeout).classify(raw)
            }
            Err(e) => {
                tracing::error!(target: "sandbox::error", %execution_id, error = %e, "execution failed on the host");
                ExecutionOutcome::system_error()
            }
        };

        if let Some(diagnostic) = &outcome.diagnostic {
            tracing::debug!(target: "sandbox::error", %execution_id, %diagnostic, "script diagnostic");
        }

        // Both artifact files are removed here on every path.
        drop(artifacts);
        outcome
    }

    async fn run_confined(
        &self,
        script: &str,
        artifacts: &ExecutionArtifacts,
    ) -> Result<RawExecution> {
        let prepared = self.preparer.prepare(script, artifacts.result_path())?;
        artifacts.write_script(&prepared).await?;

        let command = self.command_for(artifacts);
        tracing::info!(
            target: "sandbox::request",
            execution_id = %artifacts.id(),
            %command,
            "launching confined process"
        );

        let output = self.provider.run(&command, self.config.timeout).await?;
        let channel =
            ResultChannel::collect(artifacts.result_path(), self.config.max_result_bytes).await?;
        Ok(RawExecution {
            output,
            channel,
            marker: prepared.marker().to_string(),
        })
    }

    /// `<binary> --config <policy> -- <python> <script>`
    fn command_for(&self, artifacts: &ExecutionArtifacts) -> ConfinementCommand {
        ConfinementCommand::new(&self.config.binary_path)
            .arg("--config")
            .arg(&self.config.config_path)
            .arg("--")
            .arg(&self.config.python_path)
            .arg(artifacts.script_path())
    }
}

impl std::fmt::Debug for SandboxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
