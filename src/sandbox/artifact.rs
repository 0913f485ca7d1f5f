//! Per-execution filesystem artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;
use crate::sandbox::preparer::PreparedScript;

/// The script file and result file owned by one execution.
///
/// Names carry a fresh v4 UUID, so concurrent executions never share a path.
/// Both files are removed when the value is dropped, whatever happened in
/// between; that includes early returns, panics, and a cancelled future.
#[derive(Debug)]
pub struct ExecutionArtifacts {
    id: Uuid,
    script_path: PathBuf,
    result_path: PathBuf,
}

impl ExecutionArtifacts {
    /// Reserve unique paths under `dir`. Nothing is created yet.
    pub fn allocate(dir: &Path) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            script_path: dir.join(format!("sandbox-{id}.py")),
            result_path: dir.join(format!("sandbox-{id}.result.json")),
        }
    }

    /// Identifier shared by both paths; also used to correlate logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the prepared script lives.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Where the confined process writes its result.
    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    /// Write the prepared script. Fails if the path already exists.
    pub async fn write_script(&self, script: &PreparedScript) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.script_path)
            .await?;
        file.write_all(script.as_str().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn remove(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::trace!(path = %path.display(), "removed artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact")
            }
        }
    }
}

impl Drop for ExecutionArtifacts {
    fn drop(&mut self) {
        Self::remove(&self.script_path);
        Self::remove(&self.result_path);
    }
}
