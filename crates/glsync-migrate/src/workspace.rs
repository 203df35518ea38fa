//! Local scratch directory holding at most one project at a time.

use crate::error::{MigrationError, Result};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Scratch directory for mirrors and export archives.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the mirror of `repo_name` is cloned.
    pub fn mirror_dir(&self, repo_name: &str) -> PathBuf {
        self.root.join(format!("{repo_name}.git"))
    }

    /// Where the export archive of `project_name` is downloaded.
    pub fn archive_path(&self, project_name: &str) -> PathBuf {
        self.root.join(format!("{project_name}.tar.gz"))
    }

    /// Delete the directory with everything in it and recreate it empty.
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(self.error(source)),
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| self.error(source))?;

        debug!(path = %self.root.display(), "Workspace reset");
        Ok(())
    }

    fn error(&self, source: std::io::Error) -> MigrationError {
        MigrationError::Workspace {
            path: self.root.display().to_string(),
            source,
        }
    }
}
