// Per-job timestamp files recording the last dispatch of each job

use crate::errors::StorageError;
use crate::models::JobState;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Directory of `<job_name>` files, each holding one JSON [`JobState`]
#[derive(Debug, Clone)]
pub struct JobStateStore {
    dir: PathBuf,
}

impl JobStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_name: &str) -> PathBuf {
        self.dir.join(job_name)
    }

    /// Last recorded state of a job, `None` if it never ran
    #[instrument(skip(self))]
    pub async fn load(&self, job_name: &str) -> Result<Option<JobState>, StorageError> {
        let path = self.path_for(job_name);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::FileSystemError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Write a job's state, replacing the previous file atomically
    #[instrument(skip(self, state), fields(job_name = %state.job_name))]
    pub async fn save(&self, state: &JobState) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StorageError::FileSystemError(format!(
                "Failed to create {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.path_for(&state.job_name);
        let tmp_path = self.dir.join(format!(".tmp-{}", state.job_name));
        let contents = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(path = %path.display(), "Job state saved");
        Ok(())
    }

    /// Every readable job state, sorted by job name
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<JobState>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(".tmp-") || !entry.file_type().await?.is_file() {
                continue;
            }

            match self.load(&name).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable timestamp file"),
            }
        }

        states.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        Ok(states)
    }
}
