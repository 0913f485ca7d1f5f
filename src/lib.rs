//! # nsjail Python Sandbox
//!
//! Runs untrusted Python scripts inside an externally confined process and
//! hands back a JSON-safe result.
//!
//! A submitted script must define `main()` returning a dict. Each execution
//! goes through a fixed pipeline:
//!
//! - **Static validation**: imports are checked against an allow-set on the
//!   parsed syntax tree; nothing is executed or imported on the host
//! - **Preparation**: a fixed epilogue is appended that calls `main()` and
//!   writes its return value to a per-execution result file
//! - **Confinement**: the script runs under nsjail (or any other
//!   [`ConfinementProvider`]) with a wall-clock budget enforced on the whole
//!   process group
//! - **Classification**: exit status, console output, and the result file
//!   are mapped onto exactly one [`Classification`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use nsjail_python_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .binary_path("/usr/bin/nsjail")
//!         .config_path("/etc/nsjail/python.cfg")
//!         .python_path("/usr/bin/python3")
//!         .timeout(Duration::from_secs(5))
//!         .build()?;
//!
//!     let runner = SandboxRunner::new(config);
//!     let outcome = runner
//!         .execute("def main():\n    print('hi')\n    return {'sum': 1 + 1}\n")
//!         .await;
//!
//!     assert!(outcome.is_success());
//!     assert_eq!(outcome.stdout, "hi\n");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! Isolation itself is delegated to the confinement binary and its policy
//! file. This crate contributes the layers around it:
//!
//! 1. **Import allow-set**: disallowed, relative, and dynamic imports are
//!    refused before anything is spawned
//! 2. **Process-group kill**: a timed-out script and every descendant it
//!    forked receive `SIGKILL`
//! 3. **Result side-channel**: the answer travels in a dedicated file, never
//!    through console output
//! 4. **Guaranteed cleanup**: per-execution files are removed on every path
//! 5. **Opaque host errors**: infrastructure failures never leak host details

pub mod error;
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "server")]
pub mod logging;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{Result, SandboxError};
pub use sandbox::config::{AppConfig, SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::SandboxRunner;
pub use sandbox::outcome::{Classification, ExecutionOutcome};
pub use sandbox::provider::{ConfinementCommand, ConfinementProvider, ProcessOutput, ProcessProvider};
pub use sandbox::validator::{StaticValidator, ValidationOutcome};
