use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::UpstreamError;

/// Re-hosts generated images and returns their public URL.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, bytes: Bytes, id: &str) -> Option<String>;

    fn name(&self) -> &str;
}

/// Uploads to an image host that accepts a multipart `file` field and answers
/// `{"errno": 0, "data": {"url": "..."}}`.
#[derive(Debug, Clone)]
pub struct HostedImageStore {
    client: Client,
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    errno: i64,
    #[serde(default)]
    data: Option<UploadData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    url: Option<String>,
}

impl HostedImageStore {
    pub fn new(upload_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, upload_url))
    }

    pub fn with_client(client: Client, upload_url: impl Into<String>) -> Self {
        Self {
            client,
            upload_url: upload_url.into(),
        }
    }

    async fn upload(&self, bytes: Bytes, id: &str) -> Result<String, UpstreamError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(format!("{}.jpeg", id))
            .mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = response.json().await?;
        if parsed.errno != 0 {
            return Err(UpstreamError::InvalidResponse(format!(
                "upload rejected (errno {}): {}",
                parsed.errno,
                parsed.message.unwrap_or_default()
            )));
        }
        parsed
            .data
            .and_then(|d| d.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| UpstreamError::InvalidResponse("upload response has no url".into()))
    }
}

#[async_trait]
impl ImageStore for HostedImageStore {
    async fn store(&self, bytes: Bytes, id: &str) -> Option<String> {
        let size = bytes.len();
        match self.upload(bytes, id).await {
            Ok(url) => {
                debug!(id, size, %url, "image uploaded");
                Some(url)
            }
            Err(e) => {
                warn!(id, size, error = %e, "image upload failed");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "hosted"
    }
}

/// Writes images into a directory that is served at `public_base_url`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
    public_base_url: String,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn file_name(bytes: &[u8], id: &str) -> String {
        let stem: String = id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let stem = if stem.is_empty() { "image" } else { &stem };
        format!("{}.{}", stem, sniff_extension(bytes))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn store(&self, bytes: Bytes, id: &str) -> Option<String> {
        let name = Self::file_name(&bytes, id);
        let path = self.dir.join(&name);

        let written = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, &bytes).await
        }
        .await;

        match written {
            Ok(()) => {
                debug!(path = %path.display(), size = bytes.len(), "image written");
                Some(format!("{}/{}", self.public_base_url, name))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "image write failed");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "fs"
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "jpeg",
    }
}
