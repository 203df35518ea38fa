//! Common types for migration operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A GitLab group (namespace folder holding projects and subgroups).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    /// Short path segment used in URLs.
    pub path: String,
    /// Slash-joined path of every ancestor plus this group.
    pub full_path: String,
    /// `None` (or `0`) for groups at the root of the instance.
    #[serde(default)]
    pub parent_id: Option<u64>,
}

impl Group {
    /// Whether the group sits at the root of its instance.
    pub fn is_root(&self) -> bool {
        self.parent_id.unwrap_or(0) == 0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.full_path, self.id)
    }
}

/// Request body for creating a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewGroup {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

impl NewGroup {
    /// Build the request that mirrors `source` under `parent_id`.
    ///
    /// A parent id of `0` creates a root group.
    pub fn mirroring(source: &Group, parent_id: u64) -> Self {
        Self {
            name: source.name.clone(),
            path: source.path.clone(),
            parent_id: (parent_id != 0).then_some(parent_id),
        }
    }
}

/// A project (repository plus its metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl Project {
    /// Name as used in repository URLs and archive file names.
    pub fn slug(&self) -> String {
        self.name.replace(' ', "-")
    }
}

/// A group badge, used as a visibility tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub link_url: String,
    #[serde(default)]
    pub image_url: String,
}

/// Request body for adding a badge to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBadge {
    pub name: String,
    pub link_url: String,
    pub image_url: String,
}

/// Server-side state of a project export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    None,
    Queued,
    Started,
    RegenerationInProgress,
    Finished,
    Failed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Queued => "queued",
            Self::Started => "started",
            Self::RegenerationInProgress => "regeneration_in_progress",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of a single export download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The archive was written to disk.
    Saved { path: PathBuf, bytes: u64 },
    /// The server answered 429; nothing was written.
    RateLimited,
}

/// Result of uploading an archive to the import endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Accepted,
    Rejected { status: u16, body: String },
}

/// How a single project transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Every step completed.
    Transferred,
    /// The project was recorded in the corrupted log and skipped.
    Corrupted { reason: String },
    /// The destination refused the imported archive.
    ImportRejected { status: u16 },
    /// The transfer stopped part way; the run continues with the next project.
    Aborted { reason: String },
}

impl ProjectOutcome {
    pub fn is_transferred(&self) -> bool {
        matches!(self, Self::Transferred)
    }
}

/// Strategy used to move a project's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Mirror clone from the source and per-ref push to the destination.
    #[default]
    Mirror,
    /// Export archive on the source and import it on the destination.
    Archive,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirror => write!(f, "mirror"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mirror" | "clone" => Ok(Self::Mirror),
            "archive" | "export" => Ok(Self::Archive),
            other => Err(format!("unknown transfer mode: {other}")),
        }
    }
}
