//! Progress tracking for a migration run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// State the group just entered.
    pub state: GroupState,

    /// Full path of the source group.
    pub group: String,

    /// Projects finished in the current group.
    pub projects_done: u64,

    /// Projects listed for the current group.
    pub projects_total: u64,

    /// Optional message.
    pub message: Option<String>,
}

/// States a source group moves through while it is being migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Returned by a listing call on the source.
    Discovered,
    /// The eligibility check ran and admitted the group.
    Classified,
    /// The eligibility check refused the group; its subtree is skipped.
    Rejected,
    /// The destination group exists.
    GroupEnsured,
    /// The source badge has been propagated (or there was nothing to do).
    BadgeApplied,
    /// Every project in the group went through the transfer pipeline.
    ProjectsTransferred,
    /// Subgroups have been queued for processing.
    SubgroupsEnumerated,
    /// Nothing left to do for this group.
    Done,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Classified => write!(f, "Classified"),
            Self::Rejected => write!(f, "Rejected"),
            Self::GroupEnsured => write!(f, "Destination group ready"),
            Self::BadgeApplied => write!(f, "Badge applied"),
            Self::ProjectsTransferred => write!(f, "Projects transferred"),
            Self::SubgroupsEnumerated => write!(f, "Subgroups queued"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Progress tracker for a migration run.
pub struct MigrationProgress {
    groups_done: AtomicU64,
    groups_rejected: AtomicU64,
    projects_done: AtomicU64,
    projects_total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl MigrationProgress {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            groups_done: AtomicU64::new(0),
            groups_rejected: AtomicU64::new(0),
            projects_done: AtomicU64::new(0),
            projects_total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Record that `group` entered `state`.
    pub fn transition(&self, group: &str, state: GroupState) {
        match state {
            GroupState::Done => {
                self.groups_done.fetch_add(1, Ordering::SeqCst);
            }
            GroupState::Rejected => {
                self.groups_rejected.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        self.notify(state, group, None);
    }

    /// Start counting the projects of a group.
    pub fn begin_projects(&self, total: u64) {
        self.projects_done.store(0, Ordering::SeqCst);
        self.projects_total.store(total, Ordering::SeqCst);
    }

    /// Record a finished project.
    ///
    /// The group is still in [`GroupState::BadgeApplied`] while its projects
    /// are being transferred, so that is the state reported.
    pub fn project_finished(&self, group: &str, project: &str) {
        self.projects_done.fetch_add(1, Ordering::SeqCst);
        self.notify(GroupState::BadgeApplied, group, Some(project.to_string()));
    }

    /// Groups that reached [`GroupState::Done`].
    pub fn groups_done(&self) -> u64 {
        self.groups_done.load(Ordering::SeqCst)
    }

    /// Groups that were rejected by the eligibility check.
    pub fn groups_rejected(&self) -> u64 {
        self.groups_rejected.load(Ordering::SeqCst)
    }

    /// Get current project percentage for the active group.
    pub fn percentage(&self) -> f64 {
        let total = self.projects_total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.projects_done.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }

    fn notify(&self, state: GroupState, group: &str, message: Option<String>) {
        if let Some(callback) = &self.callback {
            let update = ProgressUpdate {
                state,
                group: group.to_string(),
                projects_done: self.projects_done.load(Ordering::SeqCst),
                projects_total: self.projects_total.load(Ordering::SeqCst),
                message,
            };
            callback(update);
        }
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Console progress reporter using indicatif.
pub struct ConsoleProgressReporter {
    spinner: indicatif::ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    pub fn new() -> Self {
        let spinner = indicatif::ProgressBar::new_spinner();
        spinner.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));

        Self { spinner }
    }

    /// Create a progress callback for use with the migrator.
    pub fn callback(&self) -> ProgressCallback {
        let spinner = self.spinner.clone();
        Box::new(move |update: ProgressUpdate| {
            let mut msg = format!("{}: {}", update.group, update.state);
            if update.projects_total > 0 {
                msg = format!(
                    "{msg} [{}/{} projects]",
                    update.projects_done, update.projects_total
                );
            }
            if let Some(message) = &update.message {
                msg = format!("{msg} - {message}");
            }
            spinner.set_message(msg);
        })
    }

    /// Finish the spinner.
    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
