use std::path::Path;
use std::sync::Arc;

use reqwest::header;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::auth::Authenticator;
use super::error::{AuthError, DriveError};

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com";

const MP3_MIME: &str = "audio/mpeg";

/// A file created by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "webViewLink")]
    pub web_view_link: Option<String>,
}

impl UploadedFile {
    /// Browser link to the file.
    pub fn url(&self) -> String {
        self.web_view_link
            .clone()
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", self.id))
    }
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Minimal Drive v3 client: metadata, media download and resumable upload.
pub struct DriveClient {
    http: reqwest::Client,
    auth: Arc<Authenticator>,
    api_url: String,
    upload_url: String,
}

impl DriveClient {
    pub fn new(
        http: reqwest::Client,
        auth: Arc<Authenticator>,
        api_url: &str,
        upload_url: &str,
    ) -> Self {
        Self {
            http,
            auth,
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
        }
    }

    /// Make sure a usable access token is available.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.auth.access_token().await.map(|_| ())
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/drive/v3/files/{}", self.api_url, id)
    }

    /// Name of a Drive file.
    pub async fn file_name(&self, id: &str) -> Result<String, DriveError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(self.file_url(id))
            .bearer_auth(token)
            .query(&[("fields", "name"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let metadata: FileMetadata = check(response).await?.json().await?;

        metadata
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DriveError::MissingName(id.to_string()))
    }

    /// Stream a file's content to `dest`. Returns the number of bytes written.
    pub async fn download(&self, id: &str, dest: &Path) -> Result<u64, DriveError> {
        let token = self.auth.access_token().await?;
        let mut response = self
            .http
            .get(self.file_url(id))
            .bearer_auth(token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        response = check(response).await?;

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DriveError::io(dest, e))?;

        let mut written: u64 = 0;
        let mut reported: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| DriveError::io(dest, e))?;
            written += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = written * 100 / total;
                if percent / 10 > reported / 10 {
                    reported = percent;
                    tracing::info!(file_id = id, "download {percent}%");
                }
            }
        }
        file.flush().await.map_err(|e| DriveError::io(dest, e))?;

        tracing::info!(file_id = id, bytes = written, path = %dest.display(), "download complete");
        Ok(written)
    }

    /// Upload an MP3 into `folder_id` using a resumable upload session.
    pub async fn upload(&self, path: &Path, folder_id: &str) -> Result<UploadedFile, DriveError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DriveError::io(path, e))?;
        let token = self.auth.access_token().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [folder_id],
            "mimeType": MP3_MIME,
        });
        let session = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.upload_url))
            .bearer_auth(&token)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", "id,name,webViewLink"),
            ])
            .header("X-Upload-Content-Type", MP3_MIME)
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&metadata)
            .send()
            .await?;
        let session = check(session).await?;

        let location = session
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(DriveError::MissingUploadSession)?
            .to_string();

        tracing::info!(name = %name, folder_id, bytes = bytes.len(), "uploading to drive");
        let response = self
            .http
            .put(location)
            .bearer_auth(&token)
            .header(header::CONTENT_TYPE, MP3_MIME)
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadedFile = check(response).await?.json().await?;

        tracing::info!(file_id = %uploaded.id, "upload complete");
        Ok(uploaded)
    }
}

/// Turn a non-2xx response into [`DriveError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());

    Err(DriveError::Api {
        status: status.as_u16(),
        message,
    })
}
