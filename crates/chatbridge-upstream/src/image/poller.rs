use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chatbridge_auth::{CredentialManager, SessionCredential};
use tracing::{debug, info, warn};

use super::{ImageJob, ImageJobPoller, ImageRef, ImageStore};
use crate::client::{ImageStatus, UpstreamClient};
use crate::error::{ImageJobError, UpstreamError};

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Consecutive not-found answers tolerated before giving up.
    pub not_found_tolerance: u32,
    /// Shortest bare base64 result taken for inline image data.
    pub min_inline_len: usize,
    /// `{origin}` and `{short_id}` are substituted.
    pub fallback_url_template: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 30,
            not_found_tolerance: 5,
            min_inline_len: 100,
            fallback_url_template: "{origin}/_next/image?url=/images/{short_id}.webp&w=1024&q=75"
                .to_string(),
        }
    }
}

/// Polls the upstream image-status endpoint and turns the finished result
/// into an [`ImageRef`], re-hosting it through the configured store.
pub struct ImagePoller {
    client: UpstreamClient,
    store: Option<Arc<dyn ImageStore>>,
    settings: PollSettings,
    credentials: Option<CredentialManager>,
}

enum Outcome {
    Pending,
    Completed(Option<String>),
    Failed(String),
}

impl ImagePoller {
    pub fn new(
        client: UpstreamClient,
        store: Option<Arc<dyn ImageStore>>,
        settings: PollSettings,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            credentials: None,
        }
    }

    /// Refresh a rejected session through `credentials` and keep polling.
    /// Without a manager a rejection ends the poll.
    pub fn with_credentials(mut self, credentials: CredentialManager) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Poll until the job completes, fails, or the attempt budget runs out.
    pub async fn poll_job(
        &self,
        job: &ImageJob,
        credential: &SessionCredential,
    ) -> Result<ImageRef, ImageJobError> {
        let mut not_found = 0u32;
        let mut refreshed: Option<Arc<SessionCredential>> = None;

        for attempt in 1..=self.settings.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.poll_interval).await;
            }

            let current = refreshed.as_deref().unwrap_or(credential);
            let status = match self.client.image_status(&job.job_id, current).await {
                Ok(Some(status)) => {
                    not_found = 0;
                    status
                }
                Ok(None) => {
                    not_found += 1;
                    debug!(job_id = %job.job_id, attempt, not_found, "image job not found");
                    if not_found > self.settings.not_found_tolerance {
                        return Err(ImageJobError::NotFound {
                            consecutive: not_found,
                        });
                    }
                    continue;
                }
                Err(UpstreamError::AuthRejected { status }) => {
                    if refreshed.is_some() {
                        return Err(ImageJobError::AuthRejected { status });
                    }
                    warn!(job_id = %job.job_id, attempt, status, "image status rejected session");
                    refreshed = Some(self.refresh(current, status).await?);
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %job.job_id, attempt, error = %e, "image status check failed");
                    continue;
                }
            };

            match classify(status) {
                Outcome::Pending => {
                    debug!(job_id = %job.job_id, attempt, "image job pending");
                }
                Outcome::Failed(reason) => return Err(ImageJobError::Failed(reason)),
                Outcome::Completed(result) => {
                    info!(job_id = %job.job_id, attempt, "image job completed");
                    return Ok(self.normalize(job, result.as_deref(), current).await);
                }
            }
        }

        Err(ImageJobError::Timeout {
            attempts: self.settings.max_attempts,
        })
    }

    /// One forced refresh per poll; a second rejection is final.
    async fn refresh(
        &self,
        rejected: &SessionCredential,
        status: u16,
    ) -> Result<Arc<SessionCredential>, ImageJobError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ImageJobError::AuthRejected { status })?;
        credentials
            .force_refresh(rejected)
            .await
            .ok_or(ImageJobError::AuthRejected { status })
    }

    async fn normalize(
        &self,
        job: &ImageJob,
        result: Option<&str>,
        credential: &SessionCredential,
    ) -> ImageRef {
        let Some(result) = result.map(str::trim).filter(|r| !r.is_empty()) else {
            return ImageRef::Fallback(self.fallback_url(job));
        };

        if result.starts_with("data:") {
            if let Some(bytes) = decode_data_url(result) {
                if let Some(url) = self.store(bytes, job).await {
                    return ImageRef::Hosted(url);
                }
            }
            return ImageRef::Inline(result.to_string());
        }

        if result.len() >= self.settings.min_inline_len {
            if let Some(bytes) = decode_base64(result) {
                if let Some(url) = self.store(bytes, job).await {
                    return ImageRef::Hosted(url);
                }
                return ImageRef::Inline(format!("data:image/jpeg;base64,{}", result));
            }
        }

        if result.starts_with("http://") || result.starts_with("https://") {
            if let Some(url) = self.rehost(result, job, credential).await {
                return ImageRef::Hosted(url);
            }
            return ImageRef::Absolute(result.to_string());
        }

        if result.starts_with('/') {
            let resolved = format!("{}{}", self.client.origin(), result);
            if let Some(url) = self.rehost(&resolved, job, credential).await {
                return ImageRef::Hosted(url);
            }
            return ImageRef::Resolved(resolved);
        }

        debug!(job_id = %job.job_id, "unrecognised image result, using fallback url");
        ImageRef::Fallback(self.fallback_url(job))
    }

    async fn store(&self, bytes: Bytes, job: &ImageJob) -> Option<String> {
        let store = self.store.as_ref()?;
        store.store(bytes, &job.job_id).await
    }

    /// Fetch and store. Skips the download when there is nowhere to put it.
    async fn rehost(
        &self,
        url: &str,
        job: &ImageJob,
        credential: &SessionCredential,
    ) -> Option<String> {
        self.store.as_ref()?;
        match self.client.fetch_bytes(url, credential).await {
            Ok(bytes) => self.store(bytes, job).await,
            Err(e) => {
                warn!(job_id = %job.job_id, %url, error = %e, "image download failed");
                None
            }
        }
    }

    fn fallback_url(&self, job: &ImageJob) -> String {
        self.settings
            .fallback_url_template
            .replace("{origin}", self.client.origin())
            .replace("{short_id}", job.short_id())
    }
}

#[async_trait]
impl ImageJobPoller for ImagePoller {
    async fn poll(&self, job: &ImageJob, credential: &SessionCredential) -> Option<ImageRef> {
        match self.poll_job(job, credential).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "image job produced no image");
                None
            }
        }
    }
}

fn classify(status: ImageStatus) -> Outcome {
    if let Some(result) = &status.result {
        if result.starts_with("Failed") {
            return Outcome::Failed(result.clone());
        }
    }
    match status.status.as_str() {
        "completed" | "succeeded" => Outcome::Completed(status.result),
        "failed" => Outcome::Failed(status.result.unwrap_or_else(|| "failed".to_string())),
        _ => Outcome::Pending,
    }
}

fn decode_data_url(url: &str) -> Option<Bytes> {
    let (meta, data) = url.strip_prefix("data:")?.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    decode_base64(data)
}

fn decode_base64(data: &str) -> Option<Bytes> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty()
        || !compact
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    {
        return None;
    }
    STANDARD.decode(compact).ok().map(Bytes::from)
}
