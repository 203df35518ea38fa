//! Credentials and run settings.

use crate::error::{MigrationError, Result};
use crate::types::TransferMode;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Access details for the source and destination instances.
///
/// Read from a JSON file with exactly these four keys; none has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "gitlabURLSource")]
    pub source_url: String,
    #[serde(rename = "privateTokenSource")]
    pub source_token: String,
    #[serde(rename = "gitlabURLDest")]
    pub destination_url: String,
    #[serde(rename = "privateTokenDest")]
    pub destination_token: String,
}

impl Credentials {
    /// Load and validate credentials from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate credentials from a JSON document.
    pub fn from_json(contents: &str) -> Result<Self> {
        let mut credentials: Credentials = serde_json::from_str(contents)
            .map_err(|e| MigrationError::InvalidConfig(format!("failed to parse credentials: {e}")))?;

        credentials.source_url = normalize_url("gitlabURLSource", &credentials.source_url)?;
        credentials.destination_url =
            normalize_url("gitlabURLDest", &credentials.destination_url)?;

        if credentials.source_token.trim().is_empty() {
            return Err(MigrationError::InvalidConfig(
                "privateTokenSource must not be empty".to_string(),
            ));
        }
        if credentials.destination_token.trim().is_empty() {
            return Err(MigrationError::InvalidConfig(
                "privateTokenDest must not be empty".to_string(),
            ));
        }

        Ok(credentials)
    }
}

fn normalize_url(field: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| MigrationError::InvalidConfig(format!("{field} is not a valid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(MigrationError::InvalidConfig(format!(
            "{field} must be an http(s) URL with a host, got {raw:?}"
        )));
    }

    Ok(trimmed.to_string())
}

/// Fixed parameters of a migration run.
///
/// Built once before the walker starts and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Top-level destination group that receives all migrated content.
    pub migration_namespace: String,

    /// URL of the intermediate staging (quarantine) instance.
    pub staging_instance_url: String,

    /// URL of the final destination instance.
    pub final_instance_url: String,

    /// Root groups admitted when transferring into the staging instance.
    pub allowed_root_groups: Vec<String>,

    /// Delay between two export status checks.
    pub export_poll_interval: Duration,

    /// Polls that may report `none` before a project counts as corrupted.
    pub export_poll_max_none_attempts: u32,

    /// Delay before retrying a rate-limited download.
    pub download_retry_interval: Duration,

    /// SSH port of the source instance.
    pub source_ssh_port: u16,

    /// SSH port used when pushing to the staging instance.
    pub staging_ssh_port: u16,

    /// SSH port used when pushing to the final instance.
    pub final_ssh_port: u16,

    /// Local directory holding at most one project's mirror or archive.
    pub workspace_dir: PathBuf,

    /// Per-project transfer strategy.
    pub transfer_mode: TransferMode,

    /// Placeholder link written on copied badges.
    pub badge_link_url: String,

    /// Placeholder image written on copied badges.
    pub badge_image_url: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            migration_namespace: "mock-sync".to_string(),
            staging_instance_url: "https://staging.gitlab.internal".to_string(),
            final_instance_url: "https://git.example.com".to_string(),
            allowed_root_groups: vec!["mock".to_string(), "mock-dep".to_string()],
            export_poll_interval: Duration::from_secs(5),
            export_poll_max_none_attempts: 15,
            download_retry_interval: Duration::from_secs(5),
            source_ssh_port: 2222,
            staging_ssh_port: 2222,
            final_ssh_port: 22,
            workspace_dir: PathBuf::from("./cloneProjects"),
            transfer_mode: TransferMode::Mirror,
            badge_link_url: "https://example.com".to_string(),
            badge_image_url: "https://example.com/badge.svg".to_string(),
        }
    }
}

impl MigrationSettings {
    /// Set the migration namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.migration_namespace = namespace.into();
        self
    }

    /// Set the staging and final instance URLs.
    pub fn with_instances(
        mut self,
        staging: impl Into<String>,
        final_destination: impl Into<String>,
    ) -> Self {
        self.staging_instance_url = staging.into().trim_end_matches('/').to_string();
        self.final_instance_url = final_destination.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the root groups admitted into the staging instance.
    pub fn with_allowed_root_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_root_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Set export polling parameters.
    pub fn with_export_polling(mut self, interval: Duration, max_none_attempts: u32) -> Self {
        self.export_poll_interval = interval;
        self.export_poll_max_none_attempts = max_none_attempts;
        self
    }

    /// Set the delay used after a rate-limited download.
    pub fn with_download_retry_interval(mut self, interval: Duration) -> Self {
        self.download_retry_interval = interval;
        self
    }

    /// Set the SSH ports for the source, staging and final instances.
    pub fn with_ssh_ports(mut self, source: u16, staging: u16, final_destination: u16) -> Self {
        self.source_ssh_port = source;
        self.staging_ssh_port = staging;
        self.final_ssh_port = final_destination;
        self
    }

    /// Set the local workspace directory.
    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    /// Set the transfer strategy.
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }
}
