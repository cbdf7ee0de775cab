//! Infrastructure implementation of the `RunStore` port.
//!
//! `FileRunStore` keeps one JSON file per workflow run under
//! `~/.vmgr/runs/`. Writes are atomic (temp file + rename) and run on the
//! blocking pool, so a crash mid-save leaves the previous record intact.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;
use vmgr_common::{WorkflowRun, validate_run_id};

use crate::application::ports::RunStore;

/// Environment variable overriding the vmgr home directory (`~/.vmgr`).
pub const HOME_ENV: &str = "VMGR_HOME";

/// Resolve the vmgr home directory.
///
/// # Errors
///
/// Returns an error if `VMGR_HOME` is unset and the home directory cannot be
/// determined.
pub fn vmgr_home() -> Result<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        return Ok(PathBuf::from(val));
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".vmgr"))
}

/// Run log on the local filesystem.
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    /// Store under the default directory (`~/.vmgr/runs`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        Ok(Self::with_dir(vmgr_home()?.join("runs")))
    }

    /// Store under an explicit directory (used in tests).
    #[must_use]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(dir: &Path, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id).map_err(|e| anyhow::anyhow!("invalid run id '{run_id}': {e}"))?;
        Ok(dir.join(format!("{run_id}.json")))
    }

    fn load_sync(dir: &Path, run_id: &str) -> Result<Option<WorkflowRun>> {
        let path = Self::path_for(dir, run_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading run file {}", path.display()))?;
        let run = serde_json::from_str(&content)
            .with_context(|| format!("parsing run file {}", path.display()))?;
        Ok(Some(run))
    }

    fn save_sync(dir: &Path, run: &WorkflowRun) -> Result<()> {
        let path = Self::path_for(dir, &run.id)?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        let content = serde_json::to_string_pretty(run).context("serializing run")?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("finalizing run file {}", path.display()))
    }

    fn list_sync(dir: &Path) -> Result<Vec<WorkflowRun>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        let mut runs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(run_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if validate_run_id(run_id).is_err() {
                continue;
            }
            match Self::load_sync(dir, run_id) {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "skipping unreadable run");
                }
            }
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

impl RunStore for FileRunStore {
    async fn load(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        let dir = self.dir.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || Self::load_sync(&dir, &run_id))
            .await
            .context("run load task panicked")?
    }

    async fn save(&self, run: &WorkflowRun) -> Result<()> {
        let dir = self.dir.clone();
        let run = run.clone();
        tokio::task::spawn_blocking(move || Self::save_sync(&dir, &run))
            .await
            .context("run save task panicked")?
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::list_sync(&dir))
            .await
            .context("run list task panicked")?
    }
}
