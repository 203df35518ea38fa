//! CLI command implementations.

use anyhow::Context;
use chrono::Local;
use clap::Args;
use glsync_migrate::{
    ConsoleProgressReporter, CorruptedLog, Credentials, DestinationRole, MigrationProgress,
    MigrationSettings, Migrator, TransferMode,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub type Result<T> = anyhow::Result<T>;

/// Options of the `migrate` command.
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Credentials file (gitlabURLSource, privateTokenSource, gitlabURLDest, privateTokenDest)
    #[arg(short, long, default_value = "creds.json")]
    pub config: PathBuf,

    /// Per-project transfer strategy (mirror or archive)
    #[arg(short, long, default_value_t = TransferMode::Mirror)]
    pub mode: TransferMode,

    /// Destination group that receives the migrated tree
    #[arg(long, default_value = "mock-sync")]
    pub namespace: String,

    /// URL of the staging instance
    #[arg(long, default_value = "https://staging.gitlab.internal")]
    pub staging_url: String,

    /// URL of the final instance
    #[arg(long, default_value = "https://git.example.com")]
    pub final_url: String,

    /// Root groups admitted into the staging instance
    #[arg(long, value_delimiter = ',', default_value = "mock,mock-dep")]
    pub allowed_groups: Vec<String>,

    /// Seconds between export status checks
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Export polls allowed to report `none` before a project is corrupted
    #[arg(long, default_value_t = 15)]
    pub max_none_polls: u32,

    /// Seconds to wait after a rate-limited download
    #[arg(long, default_value_t = 5)]
    pub download_retry: u64,

    /// SSH port of the source instance
    #[arg(long, default_value_t = 2222)]
    pub source_ssh_port: u16,

    /// SSH port of the staging instance
    #[arg(long, default_value_t = 2222)]
    pub staging_ssh_port: u16,

    /// SSH port of the final instance
    #[arg(long, default_value_t = 22)]
    pub final_ssh_port: u16,

    /// Scratch directory for mirrors and archives (emptied before each project)
    #[arg(short, long, default_value = "./cloneProjects")]
    pub workspace: PathBuf,

    /// General diagnostic log
    #[arg(long, default_value = "general.log")]
    pub general_log: PathBuf,

    /// Corrupted-item log
    #[arg(long, default_value = "corrupted-projects.log")]
    pub corrupted_log: PathBuf,

    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

impl MigrateArgs {
    /// Settings for the migration engine.
    pub fn settings(&self) -> MigrationSettings {
        MigrationSettings::default()
            .with_namespace(&self.namespace)
            .with_instances(&self.staging_url, &self.final_url)
            .with_allowed_root_groups(self.allowed_groups.iter().cloned())
            .with_export_polling(Duration::from_secs(self.poll_interval), self.max_none_polls)
            .with_download_retry_interval(Duration::from_secs(self.download_retry))
            .with_ssh_ports(self.source_ssh_port, self.staging_ssh_port, self.final_ssh_port)
            .with_workspace(&self.workspace)
            .with_transfer_mode(self.mode)
    }
}

/// Run a full migration.
pub async fn migrate(args: &MigrateArgs) -> Result<()> {
    let started_at = Local::now();
    let clock = Instant::now();
    println!("[START] {}", started_at.format("%Y-%m-%d %H:%M:%S"));

    let credentials = Credentials::load(&args.config)
        .with_context(|| format!("failed to load credentials from {}", args.config.display()))?;
    let corrupted = CorruptedLog::open(&args.corrupted_log, started_at).with_context(|| {
        format!("failed to open {}", args.corrupted_log.display())
    })?;

    let mut migrator = Migrator::connect(&credentials, args.settings(), corrupted)?;
    tracing::info!(
        source = %credentials.source_url,
        destination = %credentials.destination_url,
        role = ?migrator.role(),
        "Migrator ready"
    );

    let reporter = (!args.no_progress).then(ConsoleProgressReporter::new);
    if let Some(reporter) = &reporter {
        migrator = migrator.with_progress(MigrationProgress::with_callback(reporter.callback()));
    }

    let result = migrator.run().await;

    if let Some(reporter) = &reporter {
        reporter.finish(if result.is_ok() { "Migration finished" } else { "Migration aborted" });
    }
    println!("[END] total time: {}", format_elapsed(clock.elapsed()));

    let summary = result.context("migration aborted")?;
    println!(
        "Groups migrated: {}, rejected: {}. Projects transferred: {}, skipped: {}",
        summary.groups_migrated,
        summary.groups_rejected,
        summary.projects_transferred,
        summary.projects_skipped
    );
    if summary.projects_skipped > 0 {
        println!(
            "Some projects were not transferred, see {} and the general log",
            args.corrupted_log.display()
        );
    }

    Ok(())
}

/// Validate a credentials file and show where a run would write.
pub fn check_config(path: &Path, staging_url: &str, final_url: &str) -> Result<()> {
    let credentials = Credentials::load(path)
        .with_context(|| format!("failed to load credentials from {}", path.display()))?;
    let settings = MigrationSettings::default().with_instances(staging_url, final_url);
    let role = DestinationRole::resolve(&credentials.destination_url, &settings);

    println!("Source:      {}", credentials.source_url);
    println!("Destination: {} ({role:?})", credentials.destination_url);
    Ok(())
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0h 00m 00s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h 02m 05s");
    }

    #[test]
    fn test_check_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(
            &path,
            r#"{
                "gitlabURLSource": "https://src.local",
                "privateTokenSource": "a",
                "gitlabURLDest": "https://stage.local/",
                "privateTokenDest": "b"
            }"#,
        )
        .unwrap();

        check_config(&path, "https://stage.local", "https://final.local").unwrap();
        assert!(check_config(&dir.path().join("missing.json"), "a", "b").is_err());
    }
}
