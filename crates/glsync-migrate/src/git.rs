//! Thin wrappers around the `git` and `git lfs` command-line tools.

use crate::error::{MigrationError, Result};

use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Ref namespace holding branches.
pub const BRANCH_REFS: &str = "refs/heads/";

/// Ref namespace holding tags.
pub const TAG_REFS: &str = "refs/tags/";

/// Git operations used by the mirror pipeline.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// `git clone --mirror <url> <dest>`.
    async fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()>;

    /// Fetch every LFS object referenced by any ref of the mirror.
    async fn lfs_fetch_all(&self, repo: &Path) -> Result<()>;

    /// Push every LFS object of the mirror to `remote`.
    async fn lfs_push_all(&self, repo: &Path, remote: &str) -> Result<()>;

    /// Full names of the refs under `prefix` (e.g. `refs/heads/`).
    async fn list_refs(&self, repo: &Path, prefix: &str) -> Result<Vec<String>>;

    /// `git push --force <remote> <refname>`.
    async fn force_push_ref(&self, repo: &Path, remote: &str, refname: &str) -> Result<()>;
}

/// [`GitRunner`] backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Use `git` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = %args.join(" "), "Running git");
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "git stdout");
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "git stderr");
        }

        Ok(output)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(MigrationError::GitCommand {
                command: format!("git {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl GitRunner for GitCli {
    async fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        let output = self.run(&["clone", "--mirror", url, &dest]).await?;

        if !output.status.success() {
            return Err(MigrationError::GitCloneFailed(format!(
                "{url}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn lfs_fetch_all(&self, repo: &Path) -> Result<()> {
        let repo = repo.to_string_lossy();
        self.run_checked(&["-C", &repo, "lfs", "fetch", "--all"])
            .await?;
        Ok(())
    }

    async fn lfs_push_all(&self, repo: &Path, remote: &str) -> Result<()> {
        let repo = repo.to_string_lossy();
        self.run_checked(&["-C", &repo, "lfs", "push", "--all", remote])
            .await?;
        Ok(())
    }

    async fn list_refs(&self, repo: &Path, prefix: &str) -> Result<Vec<String>> {
        let repo = repo.to_string_lossy();
        let output = self
            .run_checked(&["-C", &repo, "for-each-ref", "--format=%(refname)", prefix])
            .await?;
        Ok(parse_refs(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn force_push_ref(&self, repo: &Path, remote: &str, refname: &str) -> Result<()> {
        let repo = repo.to_string_lossy();
        let output = self
            .run(&["-C", &repo, "push", remote, refname, "--force"])
            .await?;

        if !output.status.success() {
            return Err(MigrationError::GitPushFailed(format!(
                "{refname} -> {remote}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

fn parse_refs(stdout: &str) -> Vec<String> {
    stdout
        .split_whitespace()
        .map(ToString::to_string)
        .collect()
}
