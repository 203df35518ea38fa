//! # glsync migration engine
//!
//! This crate copies a tree of GitLab groups and projects from one instance
//! to another, keeping the hierarchy, the group badges and the full git
//! history.
//!
//! ## Features
//!
//! - **Tree walk**: root groups first, then subgroups depth first, each mirrored
//!   under a dedicated migration namespace on the destination
//! - **Eligibility**: allow-listed roots for the staging instance, namespace
//!   prefix and `private` badge exclusion for the final instance
//! - **Mirror mode**: bare clone over SSH, LFS objects, per-ref force push
//! - **Archive mode**: project export, polling, rate-limit aware download and
//!   streaming import
//! - **Corrupted-item log**: projects that could not be exported or cloned are
//!   recorded for manual follow-up
//! - **Progress Tracking**: per-group state transitions reported to a callback
//!
//! ## Example
//!
//! ```rust,ignore
//! use glsync_migrate::{CorruptedLog, Credentials, MigrationSettings, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::load("creds.json")?;
//!     let settings = MigrationSettings::default()
//!         .with_namespace("mock-sync")
//!         .with_allowed_root_groups(["mock", "mock-dep"]);
//!     let corrupted = CorruptedLog::open("corrupted-projects.log", chrono::Local::now())?;
//!
//!     let migrator = Migrator::connect(&credentials, settings, corrupted)?;
//!     let summary = migrator.run().await?;
//!
//!     println!("{} projects transferred", summary.projects_transferred);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod corrupted;
pub mod eligibility;
pub mod error;
pub mod export;
pub mod git;
pub mod mirror;
pub mod progress;
pub mod testing;
pub mod types;
pub mod walker;
pub mod workspace;

// Re-export main types
pub use client::{GitLabClient, HostingApi};
pub use config::{Credentials, MigrationSettings};
pub use corrupted::CorruptedLog;
pub use eligibility::{Classifier, DestinationRole};
pub use error::{GroupEnsureError, MigrationError, Result};
pub use git::{GitCli, GitRunner};
pub use progress::{ConsoleProgressReporter, GroupState, MigrationProgress, ProgressCallback};
pub use types::*;
pub use walker::{MigrationSummary, Migrator};
pub use workspace::Workspace;

/// Version of the migration engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
