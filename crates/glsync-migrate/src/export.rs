//! Archive transfer: export on the source, import on the destination.

use crate::client::HostingApi;
use crate::config::MigrationSettings;
use crate::corrupted::CorruptedLog;
use crate::error::Result;
use crate::types::{DownloadOutcome, ExportStatus, ImportOutcome, Project, ProjectOutcome};
use crate::workspace::Workspace;

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How export polling ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The export finished after `polls` status checks.
    Finished { polls: u32 },
    /// The export never left `none`.
    NeverStarted { polls: u32 },
}

/// Drives `Export -> PollStatus -> Download -> Upload` for one project.
pub struct ExportPipeline<'a> {
    source: &'a dyn HostingApi,
    destination: &'a dyn HostingApi,
    corrupted: &'a CorruptedLog,
    workspace: &'a Workspace,
    poll_interval: Duration,
    max_none_attempts: u32,
    download_retry_interval: Duration,
}

impl<'a> ExportPipeline<'a> {
    pub fn new(
        source: &'a dyn HostingApi,
        destination: &'a dyn HostingApi,
        corrupted: &'a CorruptedLog,
        workspace: &'a Workspace,
        settings: &MigrationSettings,
    ) -> Self {
        Self {
            source,
            destination,
            corrupted,
            workspace,
            poll_interval: settings.export_poll_interval,
            max_none_attempts: settings.export_poll_max_none_attempts,
            download_retry_interval: settings.download_retry_interval,
        }
    }

    /// Transfer `project` into the destination namespace `namespace`.
    ///
    /// Errors are fatal to the run; a project that cannot be exported is
    /// reported as [`ProjectOutcome::Corrupted`].
    pub async fn transfer(&self, project: &Project, namespace: &str) -> Result<ProjectOutcome> {
        let name = project.slug();
        info!(project = %name, id = project.id, namespace, "Exporting project");

        self.source.trigger_export(project.id).await?;

        match self.wait_for_export(project.id).await? {
            PollResult::Finished { polls } => {
                debug!(project = %name, polls, "Export finished");
            }
            PollResult::NeverStarted { polls } => {
                error!(project = %name, id = project.id, polls, "Export never started, marking project corrupted");
                self.corrupted.project(project.id, &project.name);
                return Ok(ProjectOutcome::Corrupted {
                    reason: format!("export still `none` after {polls} polls"),
                });
            }
        }

        let archive = self.download(project.id, &name).await?;

        match self.destination.import_project(namespace, &name, &archive).await? {
            ImportOutcome::Accepted => {
                info!(project = %name, namespace, "Project imported");
                Ok(ProjectOutcome::Transferred)
            }
            ImportOutcome::Rejected { status, body } => {
                error!(project = %name, namespace, status, body = %body, "Failed to import project");
                Ok(ProjectOutcome::ImportRejected { status })
            }
        }
    }

    /// Poll the export status until it is `finished`.
    ///
    /// Attempts are counted from one. A `none` status on an attempt beyond
    /// the configured limit ends polling; any other unfinished status keeps
    /// polling.
    pub async fn wait_for_export(&self, project_id: u64) -> Result<PollResult> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let status = self.source.export_status(project_id).await?;
            debug!(project_id, attempt, status = %status, "Export status");

            if status == ExportStatus::Finished {
                return Ok(PollResult::Finished { polls: attempt });
            }
            if status == ExportStatus::None && attempt > self.max_none_attempts {
                return Ok(PollResult::NeverStarted { polls: attempt });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Download the archive, sleeping and retrying for as long as the source
    /// answers 429.
    pub async fn download(&self, project_id: u64, name: &str) -> Result<PathBuf> {
        let dest = self.workspace.archive_path(name);
        loop {
            match self.source.download_export(project_id, &dest).await? {
                DownloadOutcome::Saved { path, bytes } => {
                    info!(project = %name, bytes, "Archive downloaded");
                    return Ok(path);
                }
                DownloadOutcome::RateLimited => {
                    warn!(project = %name, "Source is rate limiting downloads, retrying");
                    tokio::time::sleep(self.download_retry_interval).await;
                }
            }
        }
    }
}
