//! End-to-end runs of the migrator over in-memory GitLab instances.
//!
//! - Staging runs: allow-list filtering, tree shape, badges, idempotence
//! - Final runs: namespace mapping, private badge exclusion
//! - Failure handling: corrupted items, group fallback, fatal downloads

use glsync_migrate::testing::{GitCall, MemoryGitLab, ScriptedGit};
use glsync_migrate::{
    CorruptedLog, Credentials, ExportStatus, GroupState, MigrationProgress, MigrationSettings,
    Migrator, TransferMode,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const STAGING: &str = "https://stage.local";
const FINAL: &str = "https://final.local";

struct Harness {
    source: Arc<MemoryGitLab>,
    destination: Arc<MemoryGitLab>,
    git: Arc<ScriptedGit>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: Arc::new(MemoryGitLab::new()),
            destination: Arc::new(MemoryGitLab::new()),
            git: Arc::new(ScriptedGit::new()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn settings(&self) -> MigrationSettings {
        MigrationSettings::default()
            .with_namespace("mock-sync")
            .with_instances(STAGING, FINAL)
            .with_allowed_root_groups(["mock", "mock-dep"])
            .with_export_polling(Duration::from_millis(1), 2)
            .with_download_retry_interval(Duration::from_millis(1))
            .with_workspace(self.dir.path().join("cloneProjects"))
    }

    fn migrator(&self, destination_url: &str, settings: MigrationSettings) -> Migrator {
        let credentials = Credentials {
            source_url: "https://src.local".into(),
            source_token: "source-token".into(),
            destination_url: destination_url.into(),
            destination_token: "destination-token".into(),
        };
        let corrupted =
            CorruptedLog::open(self.dir.path().join("corrupted.log"), chrono::Local::now()).unwrap();

        Migrator::new(
            self.source.clone(),
            self.destination.clone(),
            self.git.clone(),
            &credentials,
            settings,
            corrupted,
        )
        .unwrap()
    }

    fn corrupted_records(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("corrupted.log"))
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.contains("------------"))
            .map(ToString::to_string)
            .collect()
    }

    fn cloned_urls(&self) -> Vec<String> {
        self.git
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                GitCall::Clone { url, .. } => Some(url),
                _ => None,
            })
            .collect()
    }
}

/// Source tree used by the staging scenarios:
///
/// ```text
/// mock [team-a]      api
///   backend          db
///     internal
/// ops                tools
///   secret
/// mock-dep           lib
/// ```
struct StagingTree {
    ops: u64,
    secret: u64,
}

fn seed_staging_tree(source: &MemoryGitLab) -> StagingTree {
    let mock = source.add_group("mock", None);
    source.add_badge(mock.id, "team-a");
    source.add_project(mock.id, "api", Some("main"));
    let backend = source.add_group("backend", Some(mock.id));
    source.add_project(backend.id, "db", Some("main"));
    source.add_group("internal", Some(backend.id));

    let ops = source.add_group("ops", None);
    source.add_project(ops.id, "tools", Some("main"));
    let secret = source.add_group("secret", Some(ops.id));

    let dep = source.add_group("mock-dep", None);
    source.add_project(dep.id, "lib", Some("main"));

    StagingTree {
        ops: ops.id,
        secret: secret.id,
    }
}

#[tokio::test]
async fn test_staging_run_mirrors_allowed_tree() {
    let h = Harness::new();
    seed_staging_tree(&h.source);

    let summary = h.migrator(STAGING, h.settings()).run().await.unwrap();

    assert_eq!(summary.groups_migrated, 4);
    assert_eq!(summary.groups_rejected, 1);
    assert_eq!(summary.projects_transferred, 3);
    assert_eq!(summary.projects_skipped, 0);

    for path in [
        "mock-sync",
        "mock-sync/mock",
        "mock-sync/mock/backend",
        "mock-sync/mock/backend/internal",
        "mock-sync/mock-dep",
    ] {
        assert!(h.destination.group_by_path(path).is_some(), "missing {path}");
    }
    assert!(h.destination.group_by_path("mock-sync/ops").is_none());

    assert_eq!(
        h.cloned_urls(),
        vec![
            "ssh://git@src.local:2222/mock/api.git",
            "ssh://git@src.local:2222/mock/backend/db.git",
            "ssh://git@src.local:2222/mock-dep/lib.git",
        ]
    );
    assert!(h
        .git
        .pushed()
        .iter()
        .any(|(remote, _)| remote == "ssh://git@stage.local:2222/mock-sync/mock/backend/db.git"));
}

#[tokio::test]
async fn test_rejected_subtree_is_never_listed() {
    let h = Harness::new();
    let tree = seed_staging_tree(&h.source);

    h.migrator(STAGING, h.settings()).run().await.unwrap();

    let listed = h.source.subgroup_listings();
    assert!(!listed.contains(&tree.ops));
    assert!(!listed.contains(&tree.secret));
    assert!(h.source.exports_triggered().is_empty());
}

#[tokio::test]
async fn test_badges_copied_once_and_namespace_left_clean() {
    let h = Harness::new();
    seed_staging_tree(&h.source);

    h.migrator(STAGING, h.settings()).run().await.unwrap();
    h.migrator(STAGING, h.settings()).run().await.unwrap();

    let mock = h.destination.group_by_path("mock-sync/mock").unwrap();
    let badges = h.destination.badges(mock.id);
    assert_eq!(badges.len(), 1);
    assert_eq!(badges[0].name, "team-a");

    let backend = h.destination.group_by_path("mock-sync/mock/backend").unwrap();
    assert!(h.destination.badges(backend.id).is_empty());

    let namespace = h.destination.group_by_path("mock-sync").unwrap();
    assert!(h.destination.badges(namespace.id).is_empty());
}

#[tokio::test]
async fn test_second_run_creates_no_groups() {
    let h = Harness::new();
    seed_staging_tree(&h.source);

    h.migrator(STAGING, h.settings()).run().await.unwrap();
    let created = h.destination.groups_created().len();
    h.migrator(STAGING, h.settings()).run().await.unwrap();

    assert_eq!(created, 5);
    assert_eq!(h.destination.groups_created().len(), created);
}

#[tokio::test]
async fn test_final_run_maps_namespace_and_drops_private_groups() {
    let h = Harness::new();
    let staged = h.source.add_group("mock-sync", None);
    h.source.add_badge(staged.id, "team-root");
    let public = h.source.add_group("mock", Some(staged.id));
    h.source.add_project(public.id, "api", Some("main"));
    let private = h.source.add_group("secret", Some(staged.id));
    h.source.add_badge(private.id, "private");
    h.source.add_project(private.id, "vault", Some("main"));
    h.source.add_group("mock", None);

    let summary = h.migrator(FINAL, h.settings()).run().await.unwrap();

    assert_eq!(summary.groups_rejected, 2);
    assert!(h.destination.group_by_path("mock-sync/mock-sync").is_none());
    assert!(h.destination.group_by_path("mock-sync/mock").is_some());
    assert!(h.destination.group_by_path("mock-sync/secret").is_none());

    assert_eq!(h.cloned_urls(), vec!["ssh://git@src.local:2222/mock-sync/mock/api.git"]);
    assert_eq!(
        h.git.pushed(),
        vec![(
            "ssh://git@final.local:22/mock-sync/mock/api.git".to_string(),
            "refs/heads/main".to_string()
        )]
    );

    let namespace = h.destination.group_by_path("mock-sync").unwrap();
    assert!(h.destination.badges(namespace.id).is_empty());
}

#[tokio::test]
async fn test_final_run_rejects_when_badge_unreadable() {
    let h = Harness::new();
    let staged = h.source.add_group("mock-sync", None);
    h.source.add_project(staged.id, "api", Some("main"));
    h.source.fail_badge_listing();

    let summary = h.migrator(FINAL, h.settings()).run().await.unwrap();

    assert_eq!(summary.groups_rejected, 1);
    assert!(h.cloned_urls().is_empty());
}

#[tokio::test]
async fn test_clone_failure_is_recorded_and_run_continues() {
    let h = Harness::new();
    seed_staging_tree(&h.source);
    h.git.fail_clone("ssh://git@src.local:2222/mock/api.git");

    let summary = h.migrator(STAGING, h.settings()).run().await.unwrap();

    assert_eq!(summary.projects_transferred, 2);
    assert_eq!(summary.projects_skipped, 1);
    let records = h.corrupted_records();
    assert_eq!(records.len(), 1);
    assert!(records[0].ends_with("Cloning corrupted, URL: ssh://git@src.local:2222/mock/api.git"));
}

#[tokio::test]
async fn test_group_creation_failure_falls_back_to_parent() {
    let h = Harness::new();
    seed_staging_tree(&h.source);
    h.destination.fail_group_creation("backend");

    let summary = h.migrator(STAGING, h.settings()).run().await.unwrap();

    assert_eq!(summary.groups_migrated, 4);
    assert!(h.destination.group_by_path("mock-sync/mock/backend").is_none());
    assert!(h.destination.group_by_path("mock-sync/mock/internal").is_some());
}

#[tokio::test]
async fn test_archive_run_imports_and_records_stuck_exports() {
    let h = Harness::new();
    let mock = h.source.add_group("mock", None);
    let api = h.source.add_project(mock.id, "api", Some("main"));
    let stuck = h.source.add_project(mock.id, "legacy app", Some("master"));
    h.source.set_archive(api.id, b"api-archive".to_vec());
    h.source
        .script_export_statuses(api.id, vec![ExportStatus::Queued, ExportStatus::Finished]);
    h.source.script_export_statuses(stuck.id, vec![ExportStatus::None; 3]);
    h.source.script_downloads(api.id, vec![429, 200]);

    let settings = h.settings().with_transfer_mode(TransferMode::Archive);
    let summary = h.migrator(STAGING, settings).run().await.unwrap();

    assert_eq!(summary.projects_transferred, 1);
    assert_eq!(summary.projects_skipped, 1);
    assert_eq!(h.source.export_status_calls(stuck.id), 3);

    let imports = h.destination.imports();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].namespace, "mock-sync/mock");
    assert_eq!(imports[0].path, "api");
    assert_eq!(imports[0].bytes, b"api-archive");

    let records = h.corrupted_records();
    assert_eq!(records.len(), 1);
    assert!(records[0].ends_with(&format!("Project corrupted: {};legacy app", stuck.id)));

    let workspace = h.dir.path().join("cloneProjects");
    assert_eq!(std::fs::read_dir(workspace).unwrap().count(), 0);
    assert!(h.git.calls().is_empty());
}

#[tokio::test]
async fn test_archive_download_failure_aborts_run() {
    let h = Harness::new();
    let mock = h.source.add_group("mock", None);
    let api = h.source.add_project(mock.id, "api", Some("main"));
    let later = h.source.add_project(mock.id, "web", Some("main"));
    h.source.script_downloads(api.id, vec![429, 500]);

    let settings = h.settings().with_transfer_mode(TransferMode::Archive);
    let err = h.migrator(STAGING, settings).run().await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(h.source.download_calls(api.id), 2);
    assert!(!h.source.exports_triggered().contains(&later.id));
    assert!(h.destination.imports().is_empty());
}

#[tokio::test]
async fn test_progress_reports_group_states() {
    let h = Harness::new();
    seed_staging_tree(&h.source);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress = MigrationProgress::with_callback(Box::new(move |update| {
        if update.message.is_none() {
            sink.lock().push((update.group, update.state));
        }
    }));

    let migrator = h.migrator(STAGING, h.settings()).with_progress(progress);
    migrator.run().await.unwrap();

    assert_eq!(migrator.progress().groups_done(), 4);
    assert_eq!(migrator.progress().groups_rejected(), 1);

    let seen = seen.lock();
    let ops: Vec<GroupState> = seen
        .iter()
        .filter(|(group, _)| group == "ops")
        .map(|(_, state)| *state)
        .collect();
    assert_eq!(ops, vec![GroupState::Discovered, GroupState::Rejected]);

    let mock: Vec<GroupState> = seen
        .iter()
        .filter(|(group, _)| group == "mock")
        .map(|(_, state)| *state)
        .collect();
    assert_eq!(
        mock,
        vec![
            GroupState::Discovered,
            GroupState::Classified,
            GroupState::GroupEnsured,
            GroupState::BadgeApplied,
            GroupState::ProjectsTransferred,
            GroupState::SubgroupsEnumerated,
            GroupState::Done,
        ]
    );
}
