use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::rest_types::{
    CreateMultipartUploadUrlsRequest, CreateMultipartUploadUrlsResponse, StartImportUploadedPartsRequest,
    StartTaskResponse, TaskCollectionResponse,
};

const PART_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Repository API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result of writing one part to a pre-signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    Uploaded { etag: String },
    Failed { reason: String },
}

impl PartOutcome {
    pub fn etag(&self) -> Option<&str> {
        match self {
            PartOutcome::Uploaded { etag } => Some(etag),
            PartOutcome::Failed { .. } => None,
        }
    }
}

/// Removes one leading and one trailing double quote, when present.
pub fn strip_etag_quotes(raw: &str) -> &str {
    let trimmed = raw.strip_prefix('"').unwrap_or(raw);
    trimmed.strip_suffix('"').unwrap_or(trimmed)
}

/// Connection to one repository. Every operation goes through an explicit
/// instance, so independent uploads can share a process.
pub struct RepositoryClient {
    client: Client,
    base_url: Url,
    repository_id: String,
    access_token: String,
}

impl RepositoryClient {
    pub fn new(mut base_url: Url, repository_id: String, access_token: String) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            client: Client::new(),
            base_url,
            repository_id,
            access_token,
        }
    }

    fn route(&self, route: &str) -> Result<Url, ApiError> {
        Ok(self
            .base_url
            .join(&format!("v2/Repositories/{}/{}", self.repository_id, route))?)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    pub async fn create_multipart_upload_urls(
        &self,
        request: &CreateMultipartUploadUrlsRequest,
    ) -> Result<CreateMultipartUploadUrlsResponse, ApiError> {
        let url = self.route("Entries/CreateMultipartUploadUrls")?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    pub async fn start_import_uploaded_parts(
        &self,
        folder_id: i64,
        request: &StartImportUploadedPartsRequest,
    ) -> Result<StartTaskResponse, ApiError> {
        let url = self.route(&format!("Entries/{}/Folder/StartImportUploadedParts", folder_id))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    pub async fn list_tasks(&self, task_ids: &[String]) -> Result<TaskCollectionResponse, ApiError> {
        let url = self.route("Tasks")?;
        let query: Vec<(&str, &str)> = task_ids.iter().map(|id| ("taskIds", id.as_str())).collect();

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// PUTs one part straight to a pre-signed URL. Only an exact 200 carrying
    /// an `ETag` header counts as uploaded; transport errors are reported as a
    /// failed part rather than propagated.
    pub async fn put_part(&self, url: &Url, data: Vec<u8>) -> PartOutcome {
        let response = match self
            .client
            .put(url.clone())
            .header(header::CONTENT_TYPE, PART_CONTENT_TYPE)
            .body(data)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "part upload failed");
                return PartOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!(%status, "part upload rejected");
            return PartOutcome::Failed {
                reason: format!("unexpected status {}", status),
            };
        }

        match response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
        {
            Some(raw) => PartOutcome::Uploaded {
                etag: strip_etag_quotes(raw).to_string(),
            },
            None => PartOutcome::Failed {
                reason: "response carried no ETag header".to_string(),
            },
        }
    }
}
