//! Session acquisition backends.
//!
//! Solving the upstream's anti-bot challenge is somebody else's job; an
//! acquirer only has to come back with a cookie set (or nothing). Two
//! implementations ship:
//! - [`HttpSessionAcquirer`]: a plain GET of the upstream origin, harvesting
//!   `Set-Cookie` headers.
//! - [`CommandSessionAcquirer`]: delegates to an external browser automation
//!   command that prints the cookies as JSON.

mod command;
mod http;

pub use command::CommandSessionAcquirer;
pub use http::HttpSessionAcquirer;

use async_trait::async_trait;

use crate::{Fingerprint, RawSession, Result};

#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    /// Obtain a fresh cookie set while presenting `fingerprint`.
    ///
    /// `Ok(None)` means the attempt completed but yielded no session. This is
    /// a slow call (seconds) and may fail transiently.
    async fn acquire_session(&self, fingerprint: &Fingerprint) -> Result<Option<RawSession>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
