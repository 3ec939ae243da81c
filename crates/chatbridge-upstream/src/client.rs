//! HTTP client for the upstream chat service.

use std::time::Duration;

use bytes::Bytes;
use chatbridge_auth::SessionCredential;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::UpstreamError;
use crate::types::UpstreamChatRequest;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// One entry of `GET /api/image-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStatus {
    /// Lowercased status string.
    pub status: String,
    pub result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageStatusEntry {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Talks to the upstream as the browser identified by the credential's
/// fingerprint. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    origin: String,
}

impl UpstreamClient {
    /// `timeout` bounds connecting and each read, not the whole response, so
    /// long streams are not cut off.
    pub fn new(origin: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self::with_client(http, origin))
    }

    pub fn with_client(http: Client, origin: impl Into<String>) -> Self {
        Self {
            http,
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `POST /api/chat`. Returns the response once the status is known to be
    /// successful; the body is left for the caller to stream.
    pub async fn start_chat(
        &self,
        request: &UpstreamChatRequest,
        credential: &SessionCredential,
    ) -> Result<Response, UpstreamError> {
        debug!(
            chat_id = %request.id,
            model = %request.model,
            messages = request.messages.len(),
            generation = credential.generation(),
            "opening upstream chat"
        );
        let response = self
            .http
            .post(format!("{}/api/chat", self.origin))
            .headers(self.browser_headers(credential)?)
            .json(request)
            .send()
            .await?;
        check_status(response).await
    }

    /// `GET /api/image-status?ids=<job>`. `Ok(None)` when the job is unknown
    /// (empty list or 404).
    pub async fn image_status(
        &self,
        job_id: &str,
        credential: &SessionCredential,
    ) -> Result<Option<ImageStatus>, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/api/image-status", self.origin))
            .query(&[("ids", job_id)])
            .headers(self.browser_headers(credential)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<ImageStatusEntry> = check_status(response).await?.json().await?;

        Ok(entries.into_iter().next().map(|entry| ImageStatus {
            status: entry.status.unwrap_or_default().to_ascii_lowercase(),
            result: entry.result.and_then(|r| match r {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
        }))
    }

    /// Download an image. The session cookie is only sent to the upstream
    /// origin.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        credential: &SessionCredential,
    ) -> Result<Bytes, UpstreamError> {
        let mut request = self.http.get(url);
        if self.is_same_origin(url) {
            request = request.headers(self.browser_headers(credential)?);
        }
        let response = check_status(request.send().await?).await?;
        Ok(response.bytes().await?)
    }

    /// `GET /api/models`. Accepts a bare list or `{"models": [...]}` whose
    /// items are ids or objects with an `id`.
    pub async fn list_models(
        &self,
        credential: &SessionCredential,
    ) -> Result<Vec<String>, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/api/models", self.origin))
            .headers(self.browser_headers(credential)?)
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        model_ids(&body)
    }

    /// Scheme, host and effective port all match the upstream origin.
    fn is_same_origin(&self, url: &str) -> bool {
        let (Ok(target), Ok(origin)) = (Url::parse(url), Url::parse(&self.origin)) else {
            return false;
        };
        target.scheme() == origin.scheme()
            && target.host_str() == origin.host_str()
            && target.port_or_known_default() == origin.port_or_known_default()
    }

    fn browser_headers(&self, credential: &SessionCredential) -> Result<HeaderMap, UpstreamError> {
        let mut headers = credential.fingerprint().header_map();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ORIGIN, header_value(&self.origin)?);
        headers.insert(REFERER, header_value(&format!("{}/", self.origin))?);
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("empty"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("cors"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("same-origin"),
        );
        let mut cookie = header_value(credential.cookie_header())?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, UpstreamError> {
    HeaderValue::from_str(value).map_err(|e| UpstreamError::InvalidHeader(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(UpstreamError::AuthRejected {
            status: status.as_u16(),
        });
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body,
    })
}

fn model_ids(body: &Value) -> Result<Vec<String>, UpstreamError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("models") {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        },
        other => {
            return Err(UpstreamError::InvalidResponse(format!(
                "unexpected models payload: {}",
                other
            )))
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect())
}
