use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::SessionAcquirer;
use crate::{AuthError, Fingerprint, RawCookie, RawSession, Result};

/// Delegates acquisition to an external browser automation command.
///
/// The command receives the fingerprint as JSON on stdin (and the key
/// attributes as `CHATBRIDGE_*` environment variables) and must print the
/// resulting cookies to stdout, either as a bare array or as
/// `{"cookies": [...]}`. Cookie objects follow the shape browser automation
/// tools export: `name`, `value`, optional `expires` (unix seconds, `-1` for
/// session cookies) and optional `maxAge`.
#[derive(Debug, Clone)]
pub struct CommandSessionAcquirer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandOutput {
    Bare(Vec<BrowserCookie>),
    Wrapped { cookies: Vec<BrowserCookie> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowserCookie {
    name: String,
    value: String,
    #[serde(default)]
    expires: Option<f64>,
    #[serde(default)]
    max_age: Option<i64>,
}

impl From<BrowserCookie> for RawCookie {
    fn from(c: BrowserCookie) -> Self {
        let expires = c
            .expires
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
        RawCookie {
            name: c.name,
            value: c.value,
            expires,
            max_age: c.max_age,
        }
    }
}

impl CommandSessionAcquirer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn parse_output(stdout: &[u8]) -> Result<Option<RawSession>> {
        let text = String::from_utf8_lossy(stdout);
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let cookies = match serde_json::from_str::<CommandOutput>(text)? {
            CommandOutput::Bare(c) | CommandOutput::Wrapped { cookies: c } => c,
        };
        if cookies.is_empty() {
            return Ok(None);
        }
        Ok(Some(RawSession::new(
            cookies.into_iter().map(RawCookie::from).collect(),
        )))
    }
}

#[async_trait]
impl SessionAcquirer for CommandSessionAcquirer {
    async fn acquire_session(&self, fingerprint: &Fingerprint) -> Result<Option<RawSession>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CHATBRIDGE_USER_AGENT", &fingerprint.user_agent)
            .env("CHATBRIDGE_ACCEPT_LANGUAGE", &fingerprint.accept_language)
            .env("CHATBRIDGE_LOCALE", &fingerprint.locale)
            .env(
                "CHATBRIDGE_VIEWPORT",
                format!("{}x{}", fingerprint.viewport.width, fingerprint.viewport.height),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(fingerprint)?;
            // The command may not read stdin at all.
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(error = %e, "session command did not accept stdin");
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AuthError::AcquisitionFailed(format!(
                    "`{}` timed out after {:?}",
                    self.program, self.timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::AcquisitionFailed(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_output(&output.stdout)
    }

    fn name(&self) -> &str {
        "command"
    }
}
