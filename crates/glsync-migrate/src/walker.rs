//! Group tree walker.
//!
//! Walks the source tree root first, depth first, one group and one project
//! at a time. Each group moves through the [`GroupState`] machine; a rejected
//! group ends its subtree because its subgroups are never listed.

use crate::client::{GitLabClient, HostingApi};
use crate::config::{Credentials, MigrationSettings};
use crate::corrupted::CorruptedLog;
use crate::eligibility::{Classifier, DestinationRole};
use crate::error::{GroupEnsureError, MigrationError, Result};
use crate::export::ExportPipeline;
use crate::git::{GitCli, GitRunner};
use crate::mirror::{relax_default_branch_protection, MirrorPipeline, SshRemote};
use crate::progress::{GroupState, MigrationProgress};
use crate::types::{Group, NewBadge, NewGroup, ProjectOutcome, TransferMode};
use crate::workspace::Workspace;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters gathered during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub groups_migrated: u64,
    pub groups_rejected: u64,
    pub projects_transferred: u64,
    pub projects_skipped: u64,
}

/// A source group waiting to be processed, with the destination id of its
/// parent.
struct PendingGroup {
    source: Group,
    destination_parent: u64,
}

/// Tree walker and orchestrator for one run.
pub struct Migrator {
    source: Arc<dyn HostingApi>,
    destination: Arc<dyn HostingApi>,
    git: Arc<dyn GitRunner>,
    settings: MigrationSettings,
    classifier: Classifier,
    workspace: Workspace,
    corrupted: CorruptedLog,
    progress: MigrationProgress,
    source_remote: SshRemote,
    destination_remote: SshRemote,
}

impl Migrator {
    /// Create a migrator over explicit collaborators.
    ///
    /// Only the URLs of `credentials` are used here: they pick the
    /// destination role and the SSH hosts.
    pub fn new(
        source: Arc<dyn HostingApi>,
        destination: Arc<dyn HostingApi>,
        git: Arc<dyn GitRunner>,
        credentials: &Credentials,
        settings: MigrationSettings,
        corrupted: CorruptedLog,
    ) -> Result<Self> {
        let role = DestinationRole::resolve(&credentials.destination_url, &settings);
        let destination_port = if role.is_final() {
            settings.final_ssh_port
        } else {
            settings.staging_ssh_port
        };

        Ok(Self {
            source_remote: SshRemote::from_base_url(
                &credentials.source_url,
                settings.source_ssh_port,
            )?,
            destination_remote: SshRemote::from_base_url(
                &credentials.destination_url,
                destination_port,
            )?,
            classifier: Classifier::new(role, &settings),
            workspace: Workspace::new(settings.workspace_dir.clone()),
            source,
            destination,
            git,
            settings,
            corrupted,
            progress: MigrationProgress::new(),
        })
    }

    /// Create a migrator talking to both GitLab instances over HTTP and to
    /// the `git` binary on `PATH`.
    pub fn connect(
        credentials: &Credentials,
        settings: MigrationSettings,
        corrupted: CorruptedLog,
    ) -> Result<Self> {
        let source = GitLabClient::new(&credentials.source_url, &credentials.source_token)?;
        let destination =
            GitLabClient::new(&credentials.destination_url, &credentials.destination_token)?;

        Self::new(
            Arc::new(source),
            Arc::new(destination),
            Arc::new(GitCli::new()),
            credentials,
            settings,
            corrupted,
        )
    }

    /// Replace the progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn role(&self) -> DestinationRole {
        self.classifier.role()
    }

    pub fn progress(&self) -> &MigrationProgress {
        &self.progress
    }

    /// Run the whole migration.
    ///
    /// Per-project failures are logged and counted; an error means the run
    /// was aborted.
    pub async fn run(&self) -> Result<MigrationSummary> {
        info!(
            namespace = %self.settings.migration_namespace,
            role = ?self.role(),
            mode = %self.settings.transfer_mode,
            "Starting migration"
        );
        self.workspace.reset().await?;

        let namespace_id = self.ensure_namespace().await?;
        let roots = self.source.list_root_groups().await?;
        info!(count = roots.len(), "Root groups listed");

        let mut summary = MigrationSummary::default();
        let mut pending: Vec<PendingGroup> = roots
            .into_iter()
            .rev()
            .map(|source| PendingGroup {
                source,
                destination_parent: namespace_id,
            })
            .collect();

        while let Some(next) = pending.pop() {
            let Some((destination_id, subgroups)) = self
                .migrate_group(&next.source, next.destination_parent, namespace_id, &mut summary)
                .await?
            else {
                continue;
            };

            pending.extend(subgroups.into_iter().rev().map(|source| PendingGroup {
                source,
                destination_parent: destination_id,
            }));
        }

        self.clear_badges(namespace_id).await;

        info!(
            groups = summary.groups_migrated,
            rejected = summary.groups_rejected,
            projects = summary.projects_transferred,
            skipped = summary.projects_skipped,
            "Migration finished"
        );
        Ok(summary)
    }

    /// Take one group through the state machine.
    ///
    /// Returns the destination group id and the subgroups to visit next, or
    /// `None` when the group was rejected.
    async fn migrate_group(
        &self,
        group: &Group,
        destination_parent: u64,
        namespace_id: u64,
        summary: &mut MigrationSummary,
    ) -> Result<Option<(u64, Vec<Group>)>> {
        let label = group.full_path.as_str();
        self.progress.transition(label, GroupState::Discovered);

        let badge = self.source_badge(group).await;
        let eligible = match &badge {
            Ok(badge) => self.classifier.is_eligible(group, badge.as_deref()),
            Err(_) => !self.role().is_final() && self.classifier.is_eligible(group, None),
        };
        if !eligible {
            info!(group = %group, badge = ?badge.as_ref().ok(),"Group not eligible, skipping subtree");
            summary.groups_rejected += 1;
            self.progress.transition(label, GroupState::Rejected);
            return Ok(None);
        }
        let badge = badge.unwrap_or_default();
        self.progress.transition(label, GroupState::Classified);

        let destination_id = if group.is_root() && group.path == self.settings.migration_namespace
        {
            namespace_id
        } else {
            match self.ensure_group(group, destination_parent).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(group = %group, parent = destination_parent, error = %e, "Falling back to parent group");
                    destination_parent
                }
            }
        };
        self.progress.transition(label, GroupState::GroupEnsured);

        if let Some(name) = badge.as_deref() {
            self.apply_badge(destination_id, name).await;
        }
        self.progress.transition(label, GroupState::BadgeApplied);

        self.transfer_projects(group, destination_id, summary).await?;
        self.progress.transition(label, GroupState::ProjectsTransferred);

        let subgroups = self.source.list_subgroups(group.id).await?;
        debug!(group = %group, count = subgroups.len(), "Subgroups listed");
        self.progress.transition(label, GroupState::SubgroupsEnumerated);

        summary.groups_migrated += 1;
        self.progress.transition(label, GroupState::Done);
        Ok(Some((destination_id, subgroups)))
    }

    async fn transfer_projects(
        &self,
        group: &Group,
        destination_id: u64,
        summary: &mut MigrationSummary,
    ) -> Result<()> {
        let projects = self.source.list_group_projects(group.id).await?;
        let destination_path = self.destination_path(group);
        self.progress.begin_projects(projects.len() as u64);
        info!(group = %group, destination = %destination_path, count = projects.len(), "Transferring projects");

        for project in &projects {
            let outcome = match self.settings.transfer_mode {
                TransferMode::Mirror => {
                    self.mirror_pipeline()
                        .transfer(project, &group.full_path, &destination_path)
                        .await?
                }
                TransferMode::Archive => {
                    let outcome = self
                        .export_pipeline()
                        .transfer(project, &destination_path)
                        .await?;
                    self.workspace.reset().await?;
                    outcome
                }
            };

            match &outcome {
                ProjectOutcome::Transferred => summary.projects_transferred += 1,
                other => {
                    warn!(project = %project.name, id = project.id, outcome = ?other, "Project not transferred");
                    summary.projects_skipped += 1;
                }
            }
            self.progress.project_finished(&group.full_path, &project.name);
        }

        if self.settings.transfer_mode == TransferMode::Mirror {
            relax_default_branch_protection(self.destination.as_ref(), destination_id).await;
        }
        Ok(())
    }

    fn mirror_pipeline(&self) -> MirrorPipeline<'_> {
        MirrorPipeline::new(
            self.git.as_ref(),
            &self.corrupted,
            &self.workspace,
            self.source_remote.clone(),
            self.destination_remote.clone(),
        )
    }

    fn export_pipeline(&self) -> ExportPipeline<'_> {
        ExportPipeline::new(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.corrupted,
            &self.workspace,
            &self.settings,
        )
    }

    /// Full path of the destination copy of `group`.
    ///
    /// On the final instance the source tree already lives under the
    /// namespace.
    pub fn destination_path(&self, group: &Group) -> String {
        if self.role().is_final() {
            group.full_path.clone()
        } else {
            format!("{}/{}", self.settings.migration_namespace, group.full_path)
        }
    }

    /// Locate or create the destination copy of `group` under `parent_id`.
    ///
    /// A parent id of `0` means the destination root, where the group is
    /// looked up by path; otherwise the parent's subgroups are searched.
    pub async fn ensure_group(
        &self,
        group: &Group,
        parent_id: u64,
    ) -> std::result::Result<u64, GroupEnsureError> {
        let lookup = |source: MigrationError| GroupEnsureError::Lookup {
            path: group.full_path.clone(),
            source,
        };

        let existing = if parent_id == 0 {
            self.destination
                .get_group_by_path(&group.path)
                .await
                .map_err(lookup)?
        } else {
            self.destination
                .list_subgroups(parent_id)
                .await
                .map_err(lookup)?
                .into_iter()
                .find(|candidate| candidate.path == group.path)
        };

        if let Some(found) = existing {
            debug!(group = %group, destination = found.id, "Destination group exists");
            return Ok(found.id);
        }

        let created = self
            .destination
            .create_group(&NewGroup::mirroring(group, parent_id))
            .await
            .map_err(|source| GroupEnsureError::Create {
                path: group.full_path.clone(),
                source,
            })?;
        info!(group = %group, destination = created.id, parent = parent_id, "Destination group created");
        Ok(created.id)
    }

    async fn ensure_namespace(&self) -> Result<u64> {
        let namespace = &self.settings.migration_namespace;
        let group = Group {
            id: 0,
            name: namespace.clone(),
            path: namespace.clone(),
            full_path: namespace.clone(),
            parent_id: None,
        };

        match self.ensure_group(&group, 0).await {
            Ok(id) => Ok(id),
            Err(GroupEnsureError::Lookup { source, .. } | GroupEnsureError::Create { source, .. }) => {
                error!(namespace = %namespace, error = %source, "Failed to ensure migration namespace");
                Err(source)
            }
        }
    }

    /// Name of the first badge on a source group.
    async fn source_badge(&self, group: &Group) -> Result<Option<String>> {
        match self.source.list_group_badges(group.id).await {
            Ok(badges) => Ok(badges.into_iter().next().map(|b| b.name)),
            Err(e) => {
                warn!(group = %group, error = %e, "Failed to read source badge");
                Err(e)
            }
        }
    }

    /// Copy `name` onto a destination group that has no badge yet.
    pub async fn apply_badge(&self, group_id: u64, name: &str) {
        match self.destination.list_group_badges(group_id).await {
            Ok(existing) if !existing.is_empty() => {
                debug!(group_id, badge = %existing[0].name, "Destination already has a badge");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(group_id, error = %e, "Failed to read destination badges");
                return;
            }
        }

        let badge = NewBadge {
            name: name.to_string(),
            link_url: self.settings.badge_link_url.clone(),
            image_url: self.settings.badge_image_url.clone(),
        };
        match self.destination.add_group_badge(group_id, &badge).await {
            Ok(created) => info!(group_id, badge = %created.name, "Badge copied"),
            Err(e) => warn!(group_id, badge = name, error = %e, "Failed to copy badge"),
        }
    }

    /// Remove every badge from a destination group.
    async fn clear_badges(&self, group_id: u64) {
        let badges = match self.destination.list_group_badges(group_id).await {
            Ok(badges) => badges,
            Err(e) => {
                warn!(group_id, error = %e, "Failed to read namespace badges");
                return;
            }
        };
        for badge in badges {
            if let Err(e) = self.destination.delete_group_badge(group_id, badge.id).await {
                warn!(group_id, badge = %badge.name, error = %e, "Failed to remove namespace badge");
            }
        }
    }
}
