//! Mirror transfer: bare clone from the source, per-ref force push to the
//! destination.

use crate::client::HostingApi;
use crate::corrupted::CorruptedLog;
use crate::error::{MigrationError, Result};
use crate::git::{GitRunner, BRANCH_REFS, TAG_REFS};
use crate::types::{Project, ProjectOutcome};
use crate::workspace::Workspace;

use std::path::Path;
use tracing::{debug, error, info, warn};

/// SSH endpoint of a GitLab instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshRemote {
    host: String,
    port: u16,
}

impl SshRemote {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Derive the SSH host from an instance's HTTP base URL.
    pub fn from_base_url(base_url: &str, port: u16) -> Result<Self> {
        let parsed = url::Url::parse(base_url).map_err(|e| {
            MigrationError::InvalidConfig(format!("invalid instance URL {base_url:?}: {e}"))
        })?;
        let host = parsed.host_str().ok_or_else(|| {
            MigrationError::InvalidConfig(format!("instance URL {base_url:?} has no host"))
        })?;
        Ok(Self::new(host, port))
    }

    /// `ssh://git@<host>:<port>/<group_path>/<repo>.git`
    pub fn repository_url(&self, group_path: &str, repo: &str) -> String {
        format!(
            "ssh://git@{}:{}/{}/{repo}.git",
            self.host,
            self.port,
            group_path.trim_matches('/')
        )
    }
}

/// Drives `MirrorClone -> FetchLFS -> PushBranches -> PushTags -> Cleanup`
/// for one project.
pub struct MirrorPipeline<'a> {
    git: &'a dyn GitRunner,
    corrupted: &'a CorruptedLog,
    workspace: &'a Workspace,
    source: SshRemote,
    destination: SshRemote,
}

impl<'a> MirrorPipeline<'a> {
    pub fn new(
        git: &'a dyn GitRunner,
        corrupted: &'a CorruptedLog,
        workspace: &'a Workspace,
        source: SshRemote,
        destination: SshRemote,
    ) -> Self {
        Self {
            git,
            corrupted,
            workspace,
            source,
            destination,
        }
    }

    /// Transfer `project` from `source_group_path` to `destination_group_path`.
    ///
    /// The workspace is reset afterwards whatever the outcome; only a failed
    /// reset is returned as an error.
    pub async fn transfer(
        &self,
        project: &Project,
        source_group_path: &str,
        destination_group_path: &str,
    ) -> Result<ProjectOutcome> {
        let name = project.slug();
        let source_url = self.source.repository_url(source_group_path, &name);
        let destination_url = self
            .destination
            .repository_url(destination_group_path, &name);

        let outcome = self.replicate(&name, &source_url, &destination_url).await;
        self.workspace.reset().await?;
        Ok(outcome)
    }

    async fn replicate(&self, name: &str, source_url: &str, destination_url: &str) -> ProjectOutcome {
        let repo = self.workspace.mirror_dir(name);

        info!(project = name, url = source_url, "Cloning repository");
        if let Err(e) = self.git.mirror_clone(source_url, &repo).await {
            error!(project = name, url = source_url, error = %e, "Failed to clone repository");
            self.corrupted.clone_failed(source_url);
            return ProjectOutcome::Corrupted {
                reason: e.to_string(),
            };
        }

        if let Err(e) = self.git.lfs_fetch_all(&repo).await {
            error!(project = name, url = source_url, error = %e, "Failed to fetch LFS objects");
            self.corrupted.lfs_failed(source_url);
        }
        if let Err(e) = self.git.lfs_push_all(&repo, destination_url).await {
            warn!(project = name, url = destination_url, error = %e, "Failed to push LFS objects");
        }

        let branches = match self.git.list_refs(&repo, BRANCH_REFS).await {
            Ok(refs) => refs,
            Err(e) => return aborted(name, "list branches", e),
        };
        let mut pushed = 0usize;
        for branch in &branches {
            match self.git.force_push_ref(&repo, destination_url, branch).await {
                Ok(()) => pushed += 1,
                Err(e) => {
                    warn!(project = name, branch = %branch, error = %e, "Failed to push branch");
                }
            }
        }
        debug!(project = name, pushed, total = branches.len(), "Branches pushed");

        if let Err(e) = self.push_tags(&repo, destination_url).await {
            return aborted(name, "push tags", e);
        }

        info!(project = name, url = destination_url, "Repository pushed");
        ProjectOutcome::Transferred
    }

    async fn push_tags(&self, repo: &Path, destination_url: &str) -> Result<()> {
        let tags = self.git.list_refs(repo, TAG_REFS).await?;
        for tag in &tags {
            self.git.force_push_ref(repo, destination_url, tag).await?;
        }
        Ok(())
    }
}

fn aborted(name: &str, step: &str, e: MigrationError) -> ProjectOutcome {
    error!(project = name, step, error = %e, "Transfer aborted");
    ProjectOutcome::Aborted {
        reason: format!("{step}: {e}"),
    }
}

/// Delete the protected-branch rule of every project's default branch in a
/// destination group. Failures are logged and skipped.
pub async fn relax_default_branch_protection(destination: &dyn HostingApi, group_id: u64) {
    let projects = match destination.list_group_projects(group_id).await {
        Ok(projects) => projects,
        Err(e) => {
            warn!(group_id, error = %e, "Failed to list destination projects");
            return;
        }
    };

    for listed in projects {
        let project = match destination.get_project(listed.id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                warn!(project_id = listed.id, "Destination project disappeared");
                continue;
            }
            Err(e) => {
                warn!(project_id = listed.id, error = %e, "Failed to read destination project");
                continue;
            }
        };

        let Some(branch) = project.default_branch.as_deref() else {
            debug!(project_id = project.id, "No default branch");
            continue;
        };

        match destination.delete_protected_branch(project.id, branch).await {
            Ok(()) => debug!(project_id = project.id, branch, "Unprotected default branch"),
            Err(e) => {
                warn!(project_id = project.id, branch, error = %e, "Failed to unprotect default branch");
            }
        }
    }
}
