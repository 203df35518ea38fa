//! GitLab REST client used on both sides of a migration.

use crate::error::{MigrationError, Result};
use crate::types::{
    Badge, DownloadOutcome, ExportStatus, Group, ImportOutcome, NewBadge, NewGroup, Project,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

const PER_PAGE: usize = 100;

/// Chunks buffered between the archive reader task and the upload body.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

/// Operations the migration engine needs from a hosting-service instance.
///
/// Lookups map `404` to `None`. Every other unexpected status surfaces as
/// [`MigrationError::Api`], which callers treat as fatal unless they say
/// otherwise.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Groups that have no parent.
    async fn list_root_groups(&self) -> Result<Vec<Group>>;

    /// Direct subgroups of a group.
    async fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>>;

    /// Look a group up by its full path.
    async fn get_group_by_path(&self, full_path: &str) -> Result<Option<Group>>;

    /// Create a group.
    async fn create_group(&self, group: &NewGroup) -> Result<Group>;

    /// Projects directly inside a group.
    async fn list_group_projects(&self, group_id: u64) -> Result<Vec<Project>>;

    /// Fetch a single project.
    async fn get_project(&self, project_id: u64) -> Result<Option<Project>>;

    /// Remove the protection rule of a branch.
    async fn delete_protected_branch(&self, project_id: u64, branch: &str) -> Result<()>;

    /// Badges attached to a group, in server order.
    async fn list_group_badges(&self, group_id: u64) -> Result<Vec<Badge>>;

    /// Attach a badge to a group.
    async fn add_group_badge(&self, group_id: u64, badge: &NewBadge) -> Result<Badge>;

    /// Remove a badge from a group.
    async fn delete_group_badge(&self, group_id: u64, badge_id: u64) -> Result<()>;

    /// Ask the server to start exporting a project. The response is not checked.
    async fn trigger_export(&self, project_id: u64) -> Result<()>;

    /// Current state of a project export.
    async fn export_status(&self, project_id: u64) -> Result<ExportStatus>;

    /// Download a finished export archive to `dest`.
    async fn download_export(&self, project_id: u64, dest: &Path) -> Result<DownloadOutcome>;

    /// Import an archive as `path` inside `namespace`, overwriting any existing project.
    async fn import_project(
        &self,
        namespace: &str,
        path: &str,
        archive: &Path,
    ) -> Result<ImportOutcome>;
}

#[derive(Debug, Deserialize)]
struct ExportState {
    #[serde(default)]
    export_status: Option<ExportStatus>,
}

/// Client for a single GitLab instance (API v4).
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GitLabClient {
    /// Create a new client.
    ///
    /// Certificate verification is disabled because the instances involved
    /// commonly run with self-signed certificates.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("glsync/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(true)
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| MigrationError::InvalidConfig(format!("invalid base URL {base_url}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Base URL of the instance, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an API URL from raw path segments. Each segment is percent-encoded,
    /// so `group/subgroup` becomes a single `group%2Fsubgroup` segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| MigrationError::InvalidConfig(e.to_string()))?;
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                MigrationError::InvalidConfig(format!("{} cannot be a base URL", self.base_url))
            })?;
            path.pop_if_empty().push("api").push("v4");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        Ok(self.authorized(request).send().await?)
    }

    async fn api_error(method: &'static str, url: &Url, response: Response) -> MigrationError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        MigrationError::Api {
            method,
            path: url.path().to_string(),
            status,
            body,
        }
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| MigrationError::Decode {
            path: url.path().to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(self.client.get(url.clone())).await?;
        if !response.status().is_success() {
            return Err(Self::api_error("GET", &url, response).await);
        }
        Self::decode(&url, response).await
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self.send(self.client.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error("GET", &url, response).await);
        }
        Self::decode(&url, response).await.map(Some)
    }

    async fn get_paginated<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let mut url = self.endpoint(segments)?;
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let items: Vec<T> = self.get_json(url).await?;
            let count = items.len();
            all_items.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_items)
    }

    async fn delete(&self, url: Url) -> Result<()> {
        let response = self.send(self.client.delete(url.clone())).await?;
        if !response.status().is_success() {
            return Err(Self::api_error("DELETE", &url, response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl HostingApi for GitLabClient {
    async fn list_root_groups(&self) -> Result<Vec<Group>> {
        let groups: Vec<Group> = self.get_paginated(&["groups"]).await?;
        Ok(groups.into_iter().filter(Group::is_root).collect())
    }

    async fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>> {
        self.get_paginated(&["groups", &group_id.to_string(), "subgroups"])
            .await
    }

    async fn get_group_by_path(&self, full_path: &str) -> Result<Option<Group>> {
        self.get_optional(self.endpoint(&["groups", full_path])?).await
    }

    async fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let url = self.endpoint(&["groups"])?;
        let response = self.send(self.client.post(url.clone()).json(group)).await?;
        if !response.status().is_success() {
            return Err(Self::api_error("POST", &url, response).await);
        }
        Self::decode(&url, response).await
    }

    async fn list_group_projects(&self, group_id: u64) -> Result<Vec<Project>> {
        self.get_paginated(&["groups", &group_id.to_string(), "projects"])
            .await
    }

    async fn get_project(&self, project_id: u64) -> Result<Option<Project>> {
        self.get_optional(self.endpoint(&["projects", &project_id.to_string()])?)
            .await
    }

    async fn delete_protected_branch(&self, project_id: u64, branch: &str) -> Result<()> {
        let url = self.endpoint(&[
            "projects",
            &project_id.to_string(),
            "protected_branches",
            branch,
        ])?;
        self.delete(url).await
    }

    async fn list_group_badges(&self, group_id: u64) -> Result<Vec<Badge>> {
        self.get_json(self.endpoint(&["groups", &group_id.to_string(), "badges"])?)
            .await
    }

    async fn add_group_badge(&self, group_id: u64, badge: &NewBadge) -> Result<Badge> {
        let url = self.endpoint(&["groups", &group_id.to_string(), "badges"])?;
        let response = self.send(self.client.post(url.clone()).json(badge)).await?;
        if !response.status().is_success() {
            return Err(Self::api_error("POST", &url, response).await);
        }
        Self::decode(&url, response).await
    }

    async fn delete_group_badge(&self, group_id: u64, badge_id: u64) -> Result<()> {
        let url = self.endpoint(&[
            "groups",
            &group_id.to_string(),
            "badges",
            &badge_id.to_string(),
        ])?;
        self.delete(url).await
    }

    async fn trigger_export(&self, project_id: u64) -> Result<()> {
        let url = self.endpoint(&["projects", &project_id.to_string(), "export"])?;
        let response = self.send(self.client.post(url)).await?;
        debug!(project_id, status = %response.status(), "Export requested");
        Ok(())
    }

    async fn export_status(&self, project_id: u64) -> Result<ExportStatus> {
        let state: ExportState = self
            .get_json(self.endpoint(&["projects", &project_id.to_string(), "export"])?)
            .await?;
        Ok(state.export_status.unwrap_or(ExportStatus::Unknown))
    }

    async fn download_export(&self, project_id: u64, dest: &Path) -> Result<DownloadOutcome> {
        let url = self.endpoint(&["projects", &project_id.to_string(), "export", "download"])?;
        let response = self.send(self.client.get(url.clone())).await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(DownloadOutcome::RateLimited);
        }
        if response.status() != StatusCode::OK {
            return Err(Self::api_error("GET", &url, response).await);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut bytes = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(DownloadOutcome::Saved {
            path: dest.to_path_buf(),
            bytes,
        })
    }

    async fn import_project(
        &self,
        namespace: &str,
        path: &str,
        archive: &Path,
    ) -> Result<ImportOutcome> {
        let mut url = self.endpoint(&["projects", "import"])?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("namespace", namespace)
            .append_pair("overwrite", "true");

        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{path}.tar.gz"));

        let (chunks, producer) = spawn_archive_reader(archive.to_path_buf(), UPLOAD_CHANNEL_CAPACITY);
        let part = Part::stream(Body::wrap_stream(chunks)).file_name(file_name);
        let form = Form::new().part("file", part);

        let response = self.send(self.client.post(url).multipart(form)).await;

        let produced = producer
            .await
            .map_err(|e| MigrationError::IoError(std::io::Error::other(e)))?;
        let response = response?;

        let status = response.status();
        if status == StatusCode::CREATED {
            let bytes = produced?;
            debug!(namespace, path, bytes, "Archive imported");
            return Ok(ImportOutcome::Accepted);
        }

        // Rejected uploads may be cut short; the producer result is ignored.
        let body = response.text().await.unwrap_or_default();
        warn!(namespace, path, status = status.as_u16(), "Import rejected");
        Ok(ImportOutcome::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Read `path` on a separate task and hand its chunks over a bounded channel.
///
/// Chunks arrive in file order. A read failure is forwarded as the final item
/// so the consuming request fails instead of sending a truncated body; the
/// task's own result reports the same failure, or the byte count on success.
pub fn spawn_archive_reader(
    path: PathBuf,
    capacity: usize,
) -> (
    mpsc::Receiver<std::io::Result<Bytes>>,
    JoinHandle<std::io::Result<u64>>,
) {
    let (mut tx, rx) = mpsc::channel(capacity);

    let handle = tokio::spawn(async move {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                let _ = tx.send(Err(std::io::Error::new(e.kind(), e.to_string()))).await;
                return Err(e);
            }
        };

        let mut reader = ReaderStream::new(file);
        let mut written = 0u64;
        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(bytes) => {
                    written += bytes.len() as u64;
                    if tx.send(Ok(bytes)).await.is_err() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "upload body dropped before the archive was fully read",
                        ));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(std::io::Error::new(e.kind(), e.to_string()))).await;
                    return Err(e);
                }
            }
        }

        Ok(written)
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn group_json(id: u64, path: &str, full_path: &str, parent_id: Option<u64>) -> serde_json::Value {
        json!({
            "id": id,
            "name": path.to_uppercase(),
            "path": path,
            "full_path": full_path,
            "parent_id": parent_id,
        })
    }

    #[test]
    fn test_client_creation() {
        let client = GitLabClient::new("https://gitlab.local/", "token");
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "https://gitlab.local");
    }

    #[test]
    fn test_endpoint_encodes_full_paths() {
        let client = GitLabClient::new("https://gitlab.local", "token").unwrap();
        let url = client.endpoint(&["groups", "mock-sync/core"]).unwrap();
        assert_eq!(url.as_str(), "https://gitlab.local/api/v4/groups/mock-sync%2Fcore");
    }

    #[tokio::test]
    async fn test_list_root_groups_keeps_only_roots() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .and(header("PRIVATE-TOKEN", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                group_json(1, "core", "core", None),
                group_json(2, "libs", "core/libs", Some(1)),
                group_json(3, "ops", "ops", Some(0)),
            ])))
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let roots = client.list_root_groups().await.unwrap();

        let ids: Vec<u64> = roots.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups/5/subgroups"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let err = client.list_subgroups(5).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_unexpected_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups/5/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "nope"})))
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let err = client.list_group_projects(5).await.unwrap_err();
        assert!(matches!(err, MigrationError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_get_group_by_path_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups/mock-sync"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        assert!(client.get_group_by_path("mock-sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_group_sends_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/groups"))
            .and(body_json(json!({"name": "CORE", "path": "core", "parent_id": 10})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(group_json(11, "core", "mock-sync/core", Some(10))),
            )
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let source = Group {
            id: 1,
            name: "CORE".into(),
            path: "core".into(),
            full_path: "core".into(),
            parent_id: None,
        };
        let created = client
            .create_group(&NewGroup::mirroring(&source, 10))
            .await
            .unwrap();
        assert_eq!(created.id, 11);
    }

    #[tokio::test]
    async fn test_export_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9/export"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 9, "export_status": "started"})),
            )
            .mount(&server)
            .await;

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        assert_eq!(client.export_status(9).await.unwrap(), ExportStatus::Started);
    }

    #[tokio::test]
    async fn test_download_rate_limited_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9/export/download"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.tar.gz");
        let client = GitLabClient::new(server.uri(), "secret").unwrap();

        let outcome = client.download_export(9, &dest).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::RateLimited);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_saves_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9/export/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.tar.gz");
        let client = GitLabClient::new(server.uri(), "secret").unwrap();

        let outcome = client.download_export(9, &dest).await.unwrap();
        assert_eq!(
            outcome,
            DownloadOutcome::Saved {
                path: dest.clone(),
                bytes: 13
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive-bytes");
    }

    #[tokio::test]
    async fn test_download_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9/export/download"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.tar.gz");
        let client = GitLabClient::new(server.uri(), "secret").unwrap();

        assert!(client.download_export(9, &dest).await.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_import_project_streams_archive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/import"))
            .and(query_param("path", "billing"))
            .and(query_param("namespace", "mock-sync/core"))
            .and(query_param("overwrite", "true"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 77})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("billing.tar.gz");
        std::fs::write(&archive, vec![7u8; 200_000]).unwrap();

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let outcome = client
            .import_project("mock-sync/core", "billing", &archive)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_import_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/import"))
            .respond_with(ResponseTemplate::new(400).set_body_string("namespace missing"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("billing.tar.gz");
        std::fs::write(&archive, b"data").unwrap();

        let client = GitLabClient::new(server.uri(), "secret").unwrap();
        let outcome = client
            .import_project("mock-sync/core", "billing", &archive)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::Rejected {
                status: 400,
                body: "namespace missing".into()
            }
        );
    }

    #[tokio::test]
    async fn test_archive_reader_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ordered.tar.gz");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&archive, &data).unwrap();

        let (mut chunks, producer) = spawn_archive_reader(archive, 2);
        let mut received = Vec::new();
        while let Some(chunk) = chunks.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(received, data);
        assert_eq!(producer.await.unwrap().unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_archive_reader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut chunks, producer) = spawn_archive_reader(dir.path().join("missing.tar.gz"), 2);

        let first = chunks.next().await.unwrap();
        assert!(first.is_err());
        assert!(chunks.next().await.is_none());
        assert!(producer.await.unwrap().is_err());
    }
}
