use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, SET_COOKIE};
use reqwest::Client;

use super::SessionAcquirer;
use crate::{Fingerprint, RawCookie, RawSession, Result};

/// Acquires a session by loading the upstream origin page and keeping every
/// cookie it sets.
#[derive(Debug, Clone)]
pub struct HttpSessionAcquirer {
    client: Client,
    origin: String,
}

impl HttpSessionAcquirer {
    pub fn new(origin: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, origin))
    }

    pub fn with_client(client: Client, origin: impl Into<String>) -> Self {
        Self {
            client,
            origin: origin.into(),
        }
    }
}

#[async_trait]
impl SessionAcquirer for HttpSessionAcquirer {
    async fn acquire_session(&self, fingerprint: &Fingerprint) -> Result<Option<RawSession>> {
        let response = self
            .client
            .get(&self.origin)
            .headers(fingerprint.header_map())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await?;

        let status = response.status();
        let cookies: Vec<RawCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(RawCookie::parse_set_cookie)
            .collect();

        tracing::debug!(%status, cookies = cookies.len(), "origin page loaded");

        if cookies.is_empty() {
            return Ok(None);
        }
        Ok(Some(RawSession::new(cookies)))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_collects_set_cookie_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header_exists("user-agent"))
            .and(header_exists("sec-ch-ua"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "session_token=abc; Max-Age=600; Path=/")
                    .append_header("set-cookie", "cf_clearance=xyz; HttpOnly"),
            )
            .mount(&server)
            .await;

        let acquirer =
            HttpSessionAcquirer::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let session = acquirer
            .acquire_session(&Fingerprint::random())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.cookies.len(), 2);
        assert_eq!(session.cookie("session_token").unwrap().max_age, Some(600));
        assert_eq!(session.header_value(), "session_token=abc; cf_clearance=xyz");
    }

    #[tokio::test]
    async fn test_no_cookies_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let acquirer = HttpSessionAcquirer::new(server.uri(), Duration::from_secs(5)).unwrap();
        let session = acquirer.acquire_session(&Fingerprint::random()).await.unwrap();
        assert!(session.is_none());
    }
}
