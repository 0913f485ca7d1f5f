//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::sandbox::{
    config::{AppConfig, SandboxConfig},
    executor::SandboxRunner,
    outcome::{Classification, ExecutionOutcome},
    provider::{ConfinementProvider, ProcessProvider},
};
