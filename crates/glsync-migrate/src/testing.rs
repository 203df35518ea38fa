//! In-memory doubles of a GitLab instance and of the git CLI.
//!
//! They let the pipelines and the walker run without a network or a git
//! binary, with scripted responses and a record of every call.

use crate::client::HostingApi;
use crate::error::{MigrationError, Result};
use crate::git::{GitRunner, BRANCH_REFS, TAG_REFS};
use crate::types::{
    Badge, DownloadOutcome, ExportStatus, Group, ImportOutcome, NewBadge, NewGroup, Project,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// An archive upload received by [`MemoryGitLab`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedImport {
    pub namespace: String,
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    groups: Vec<Group>,
    projects: HashMap<u64, Vec<Project>>,
    badges: HashMap<u64, Vec<Badge>>,
    export_scripts: HashMap<u64, VecDeque<ExportStatus>>,
    export_status_calls: HashMap<u64, u32>,
    exports_triggered: Vec<u64>,
    download_scripts: HashMap<u64, VecDeque<u16>>,
    download_calls: HashMap<u64, u32>,
    archives: HashMap<u64, Vec<u8>>,
    imports: Vec<RecordedImport>,
    reject_imports: Option<u16>,
    subgroup_listings: Vec<u64>,
    groups_created: Vec<u64>,
    protected_branch_deletions: Vec<(u64, String)>,
    fail_group_creation: HashSet<String>,
    fail_badge_listing: bool,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_group(&mut self, name: &str, path: &str, parent_id: Option<u64>) -> Group {
        let full_path = match parent_id.and_then(|p| self.groups.iter().find(|g| g.id == p)) {
            Some(parent) => format!("{}/{path}", parent.full_path),
            None => path.to_string(),
        };
        let group = Group {
            id: self.allocate_id(),
            name: name.to_string(),
            path: path.to_string(),
            full_path,
            parent_id,
        };
        self.groups.push(group.clone());
        group
    }

    fn insert_project(&mut self, group_id: u64, name: &str, default_branch: Option<&str>) -> Project {
        let project = Project {
            id: self.allocate_id(),
            name: name.to_string(),
            default_branch: default_branch.map(ToString::to_string),
        };
        self.projects
            .entry(group_id)
            .or_default()
            .push(project.clone());
        project
    }
}

fn api_error(method: &'static str, path: String, status: u16, body: &str) -> MigrationError {
    MigrationError::Api {
        method,
        path,
        status,
        body: body.to_string(),
    }
}

/// In-memory [`HostingApi`].
///
/// Unscripted exports report `finished` and unscripted downloads succeed.
#[derive(Default)]
pub struct MemoryGitLab {
    state: Mutex<State>,
}

impl MemoryGitLab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group under `parent_id` (root when `None`).
    pub fn add_group(&self, path: &str, parent_id: Option<u64>) -> Group {
        self.state.lock().insert_group(path, path, parent_id)
    }

    /// Add a project to a group.
    pub fn add_project(&self, group_id: u64, name: &str, default_branch: Option<&str>) -> Project {
        self.state
            .lock()
            .insert_project(group_id, name, default_branch)
    }

    /// Attach a badge to a group.
    pub fn add_badge(&self, group_id: u64, name: &str) -> Badge {
        let mut state = self.state.lock();
        let badge = Badge {
            id: state.allocate_id(),
            name: name.to_string(),
            link_url: String::new(),
            image_url: String::new(),
        };
        state
            .badges
            .entry(group_id)
            .or_default()
            .push(badge.clone());
        badge
    }

    /// Statuses returned by successive export status checks.
    pub fn script_export_statuses(&self, project_id: u64, statuses: Vec<ExportStatus>) {
        self.state
            .lock()
            .export_scripts
            .insert(project_id, statuses.into());
    }

    /// HTTP statuses returned by successive download attempts.
    pub fn script_downloads(&self, project_id: u64, statuses: Vec<u16>) {
        self.state
            .lock()
            .download_scripts
            .insert(project_id, statuses.into());
    }

    /// Archive content served for a project.
    pub fn set_archive(&self, project_id: u64, bytes: Vec<u8>) {
        self.state.lock().archives.insert(project_id, bytes);
    }

    /// Answer every import with `status`.
    pub fn reject_imports(&self, status: u16) {
        self.state.lock().reject_imports = Some(status);
    }

    /// Make creation of a group with this path fail.
    pub fn fail_group_creation(&self, path: &str) {
        self.state
            .lock()
            .fail_group_creation
            .insert(path.to_string());
    }

    /// Make every badge listing fail.
    pub fn fail_badge_listing(&self) {
        self.state.lock().fail_badge_listing = true;
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state.lock().groups.clone()
    }

    pub fn group_by_path(&self, full_path: &str) -> Option<Group> {
        self.state
            .lock()
            .groups
            .iter()
            .find(|g| g.full_path == full_path)
            .cloned()
    }

    pub fn badges(&self, group_id: u64) -> Vec<Badge> {
        self.state
            .lock()
            .badges
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn projects(&self, group_id: u64) -> Vec<Project> {
        self.state
            .lock()
            .projects
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn imports(&self) -> Vec<RecordedImport> {
        self.state.lock().imports.clone()
    }

    pub fn exports_triggered(&self) -> Vec<u64> {
        self.state.lock().exports_triggered.clone()
    }

    pub fn export_status_calls(&self, project_id: u64) -> u32 {
        self.state
            .lock()
            .export_status_calls
            .get(&project_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn download_calls(&self, project_id: u64) -> u32 {
        self.state
            .lock()
            .download_calls
            .get(&project_id)
            .copied()
            .unwrap_or(0)
    }

    /// Group ids whose subgroups were listed, in call order.
    pub fn subgroup_listings(&self) -> Vec<u64> {
        self.state.lock().subgroup_listings.clone()
    }

    /// Ids of groups created through the API.
    pub fn groups_created(&self) -> Vec<u64> {
        self.state.lock().groups_created.clone()
    }

    pub fn protected_branch_deletions(&self) -> Vec<(u64, String)> {
        self.state.lock().protected_branch_deletions.clone()
    }
}

#[async_trait]
impl HostingApi for MemoryGitLab {
    async fn list_root_groups(&self) -> Result<Vec<Group>> {
        Ok(self
            .state
            .lock()
            .groups
            .iter()
            .filter(|g| g.is_root())
            .cloned()
            .collect())
    }

    async fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>> {
        let mut state = self.state.lock();
        state.subgroup_listings.push(group_id);
        Ok(state
            .groups
            .iter()
            .filter(|g| g.parent_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn get_group_by_path(&self, full_path: &str) -> Result<Option<Group>> {
        Ok(self.group_by_path(full_path))
    }

    async fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let mut state = self.state.lock();
        let parent = group.parent_id;

        if state.fail_group_creation.contains(&group.path) {
            return Err(api_error("POST", "/groups".into(), 500, "creation failed"));
        }
        if state
            .groups
            .iter()
            .any(|g| g.parent_id == parent && g.path == group.path)
        {
            return Err(api_error(
                "POST",
                "/groups".into(),
                400,
                "Failed to save group {:path=>[\"has already been taken\"]}",
            ));
        }

        let created = state.insert_group(&group.name, &group.path, parent);
        state.groups_created.push(created.id);
        Ok(created)
    }

    async fn list_group_projects(&self, group_id: u64) -> Result<Vec<Project>> {
        Ok(self.projects(group_id))
    }

    async fn get_project(&self, project_id: u64) -> Result<Option<Project>> {
        Ok(self
            .state
            .lock()
            .projects
            .values()
            .flatten()
            .find(|p| p.id == project_id)
            .cloned())
    }

    async fn delete_protected_branch(&self, project_id: u64, branch: &str) -> Result<()> {
        self.state
            .lock()
            .protected_branch_deletions
            .push((project_id, branch.to_string()));
        Ok(())
    }

    async fn list_group_badges(&self, group_id: u64) -> Result<Vec<Badge>> {
        if self.state.lock().fail_badge_listing {
            return Err(api_error(
                "GET",
                format!("/groups/{group_id}/badges"),
                500,
                "badges unavailable",
            ));
        }
        Ok(self.badges(group_id))
    }

    async fn add_group_badge(&self, group_id: u64, badge: &NewBadge) -> Result<Badge> {
        let mut state = self.state.lock();
        let created = Badge {
            id: state.allocate_id(),
            name: badge.name.clone(),
            link_url: badge.link_url.clone(),
            image_url: badge.image_url.clone(),
        };
        state
            .badges
            .entry(group_id)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn delete_group_badge(&self, group_id: u64, badge_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let badges = state.badges.entry(group_id).or_default();
        let before = badges.len();
        badges.retain(|b| b.id != badge_id);
        if badges.len() == before {
            return Err(api_error(
                "DELETE",
                format!("/groups/{group_id}/badges/{badge_id}"),
                404,
                "404 Badge Not Found",
            ));
        }
        Ok(())
    }

    async fn trigger_export(&self, project_id: u64) -> Result<()> {
        self.state.lock().exports_triggered.push(project_id);
        Ok(())
    }

    async fn export_status(&self, project_id: u64) -> Result<ExportStatus> {
        let mut state = self.state.lock();
        *state.export_status_calls.entry(project_id).or_default() += 1;
        Ok(state
            .export_scripts
            .get_mut(&project_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ExportStatus::Finished))
    }

    async fn download_export(&self, project_id: u64, dest: &Path) -> Result<DownloadOutcome> {
        let (status, bytes) = {
            let mut state = self.state.lock();
            *state.download_calls.entry(project_id).or_default() += 1;
            let status = state
                .download_scripts
                .get_mut(&project_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(200);
            let bytes = state
                .archives
                .get(&project_id)
                .cloned()
                .unwrap_or_else(|| format!("archive-{project_id}").into_bytes());
            (status, bytes)
        };

        match status {
            200 => {
                tokio::fs::write(dest, &bytes).await?;
                Ok(DownloadOutcome::Saved {
                    path: dest.to_path_buf(),
                    bytes: bytes.len() as u64,
                })
            }
            429 => Ok(DownloadOutcome::RateLimited),
            other => Err(api_error(
                "GET",
                format!("/projects/{project_id}/export/download"),
                other,
                "download failed",
            )),
        }
    }

    async fn import_project(
        &self,
        namespace: &str,
        path: &str,
        archive: &Path,
    ) -> Result<ImportOutcome> {
        let bytes = tokio::fs::read(archive).await?;
        let mut state = self.state.lock();
        state.imports.push(RecordedImport {
            namespace: namespace.to_string(),
            path: path.to_string(),
            bytes,
        });

        if let Some(status) = state.reject_imports {
            return Ok(ImportOutcome::Rejected {
                status,
                body: "import rejected".to_string(),
            });
        }

        let target = state
            .groups
            .iter()
            .find(|g| g.full_path == namespace)
            .map(|g| g.id);
        if let Some(group_id) = target {
            state.insert_project(group_id, path, Some("main"));
        }
        Ok(ImportOutcome::Accepted)
    }
}

/// One git invocation seen by [`ScriptedGit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCall {
    Clone { url: String, dest: PathBuf },
    LfsFetch { repo: PathBuf },
    LfsPush { repo: PathBuf, remote: String },
    ListRefs { repo: PathBuf, prefix: String },
    Push { remote: String, refname: String },
}

#[derive(Default)]
struct GitState {
    calls: Vec<GitCall>,
    refs: HashMap<String, (Vec<String>, Vec<String>)>,
    cloned_from: HashMap<PathBuf, String>,
    fail_clone: HashSet<String>,
    fail_lfs_fetch: HashSet<String>,
    fail_push: HashSet<String>,
    workspace_snapshots: Vec<Vec<String>>,
}

/// [`GitRunner`] double that records calls and fails on request.
///
/// A clone creates the destination directory with a marker file, so workspace
/// cleanup can be observed on disk.
#[derive(Default)]
pub struct ScriptedGit {
    state: Mutex<GitState>,
}

impl ScriptedGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Branch and tag names (without the `refs/...` prefix) of the repository at `url`.
    ///
    /// Repositories without an entry expose a single `main` branch.
    pub fn set_refs(&self, url: &str, branches: &[&str], tags: &[&str]) {
        let branches = branches.iter().map(|b| format!("{BRANCH_REFS}{b}")).collect();
        let tags = tags.iter().map(|t| format!("{TAG_REFS}{t}")).collect();
        self.state
            .lock()
            .refs
            .insert(url.to_string(), (branches, tags));
    }

    pub fn fail_clone(&self, url: &str) {
        self.state.lock().fail_clone.insert(url.to_string());
    }

    pub fn fail_lfs_fetch(&self, url: &str) {
        self.state.lock().fail_lfs_fetch.insert(url.to_string());
    }

    /// Fail pushes of the given full ref name (e.g. `refs/tags/v1`).
    pub fn fail_push(&self, refname: &str) {
        self.state.lock().fail_push.insert(refname.to_string());
    }

    pub fn calls(&self) -> Vec<GitCall> {
        self.state.lock().calls.clone()
    }

    /// Refs successfully pushed, as `(remote, refname)`.
    pub fn pushed(&self) -> Vec<(String, String)> {
        let state = self.state.lock();
        state
            .calls
            .iter()
            .filter_map(|call| match call {
                GitCall::Push { remote, refname } if !state.fail_push.contains(refname) => {
                    Some((remote.clone(), refname.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Entries found in the clone's parent directory right before each clone.
    pub fn workspace_snapshots(&self) -> Vec<Vec<String>> {
        self.state.lock().workspace_snapshots.clone()
    }

    fn source_of(&self, repo: &Path) -> Option<String> {
        self.state.lock().cloned_from.get(repo).cloned()
    }
}

#[async_trait]
impl GitRunner for ScriptedGit {
    async fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()> {
        let snapshot = match dest.parent() {
            Some(parent) => std::fs::read_dir(parent)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        {
            let mut state = self.state.lock();
            state.workspace_snapshots.push(snapshot);
            state.calls.push(GitCall::Clone {
                url: url.to_string(),
                dest: dest.to_path_buf(),
            });
            if state.fail_clone.contains(url) {
                return Err(MigrationError::GitCloneFailed(format!(
                    "{url}: repository not found"
                )));
            }
            state.cloned_from.insert(dest.to_path_buf(), url.to_string());
        }

        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("HEAD"), b"ref: refs/heads/main\n").await?;
        Ok(())
    }

    async fn lfs_fetch_all(&self, repo: &Path) -> Result<()> {
        let source = self.source_of(repo).unwrap_or_default();
        let mut state = self.state.lock();
        state.calls.push(GitCall::LfsFetch {
            repo: repo.to_path_buf(),
        });
        if state.fail_lfs_fetch.contains(&source) {
            return Err(MigrationError::GitCommand {
                command: "git lfs fetch --all".to_string(),
                status: "exit status: 2".to_string(),
                stderr: "missing LFS object".to_string(),
            });
        }
        Ok(())
    }

    async fn lfs_push_all(&self, repo: &Path, remote: &str) -> Result<()> {
        self.state.lock().calls.push(GitCall::LfsPush {
            repo: repo.to_path_buf(),
            remote: remote.to_string(),
        });
        Ok(())
    }

    async fn list_refs(&self, repo: &Path, prefix: &str) -> Result<Vec<String>> {
        let source = self.source_of(repo).unwrap_or_default();
        let mut state = self.state.lock();
        state.calls.push(GitCall::ListRefs {
            repo: repo.to_path_buf(),
            prefix: prefix.to_string(),
        });

        let (branches, tags) = state
            .refs
            .get(&source)
            .cloned()
            .unwrap_or_else(|| (vec![format!("{BRANCH_REFS}main")], Vec::new()));

        Ok(if prefix == TAG_REFS { tags } else { branches })
    }

    async fn force_push_ref(&self, _repo: &Path, remote: &str, refname: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(GitCall::Push {
            remote: remote.to_string(),
            refname: refname.to_string(),
        });
        if state.fail_push.contains(refname) {
            return Err(MigrationError::GitPushFailed(format!(
                "{refname} -> {remote}: rejected"
            )));
        }
        Ok(())
    }
}
