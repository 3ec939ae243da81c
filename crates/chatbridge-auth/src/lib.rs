//! Session credential lifecycle for the chatbridge gateway.
//!
//! The upstream chat service authenticates with a short-lived browser session
//! (a cookie set obtained by passing an anti-bot challenge). This crate owns
//! that session:
//! - [`Fingerprint`] generates a consistent client identity per acquisition.
//! - [`SessionAcquirer`] implementations obtain a raw cookie set.
//! - [`CredentialManager`] tracks expiry, arbitrates concurrent refreshes and
//!   keeps the credential warm in the background.

mod acquirer;
mod credential;
mod error;
mod fingerprint;
mod manager;

pub use acquirer::{CommandSessionAcquirer, HttpSessionAcquirer, SessionAcquirer};
pub use credential::{ExpiryPolicy, RawCookie, RawSession, SessionCredential};
pub use error::{AuthError, Result};
pub use fingerprint::{Browser, Fingerprint, Platform, Viewport};
pub use manager::{CredentialManager, CredentialSettings, CredentialSnapshot, CredentialState};
