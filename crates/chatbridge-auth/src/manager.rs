//! Credential lifecycle: expiry tracking and refresh arbitration.
//!
//! The manager is the only owner of the session credential. Readers get an
//! `Arc` snapshot; refreshes build a new credential and swap it in whole.
//! At most one acquisition runs at a time: the first caller to win the
//! `refresh_owner` ticket spawns the acquisition, everyone else waits on a
//! [`Notify`] until it finishes or their wait budget runs out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    AuthError, ExpiryPolicy, Fingerprint, Result, SessionAcquirer, SessionCredential,
};

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    /// Cookie whose presence marks a usable session.
    pub auth_cookie: String,
    pub expiry: ExpiryPolicy,
    /// How long a caller waits for an in-flight refresh.
    pub refresh_wait: Duration,
    /// Background re-validation period.
    pub check_interval: Duration,
    /// Refresh proactively once the credential expires within this window.
    pub refresh_margin: Duration,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            auth_cookie: "session_token".to_string(),
            expiry: ExpiryPolicy::default(),
            refresh_wait: Duration::from_secs(30),
            check_interval: Duration::from_secs(30),
            refresh_margin: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CredentialState {
    Missing,
    Valid { expires_in_secs: i64 },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialSnapshot {
    #[serde(flatten)]
    pub state: CredentialState,
    pub refreshing: bool,
    pub generation: u64,
}

struct Inner {
    current: RwLock<Option<Arc<SessionCredential>>>,
    /// Non-zero while a refresh runs; holds the running refresh's ticket.
    refresh_owner: AtomicU64,
    next_ticket: AtomicU64,
    next_generation: AtomicU64,
    refreshed: Notify,
    acquirer: Arc<dyn SessionAcquirer>,
    settings: CredentialSettings,
}

/// Clears the refresh flag and wakes waiters, even if the acquirer panics.
struct RefreshGuard {
    inner: Arc<Inner>,
    ticket: u64,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        // A waiter may have force-cleared a stuck ticket and started its own
        // refresh; only release the flag if it is still ours.
        let _ = self.inner.refresh_owner.compare_exchange(
            self.ticket,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.refreshed.notify_waiters();
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl CredentialManager {
    pub fn new(acquirer: Arc<dyn SessionAcquirer>, settings: CredentialSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: RwLock::new(None),
                refresh_owner: AtomicU64::new(0),
                next_ticket: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                refreshed: Notify::new(),
                acquirer,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &CredentialSettings {
        &self.inner.settings
    }

    /// Return a valid credential, refreshing if necessary.
    ///
    /// Returns immediately when the current credential has not expired.
    /// Otherwise waits at most `refresh_wait` for a refresh.
    pub async fn ensure(&self) -> Result<Arc<SessionCredential>> {
        if let Some(credential) = self.current_valid() {
            return Ok(credential);
        }
        self.refresh()
            .await
            .ok_or(AuthError::Unavailable(self.inner.settings.refresh_wait))
    }

    /// Discard `rejected` after the upstream refused it and acquire anew.
    ///
    /// If another caller already replaced the rejected credential, the newer
    /// one is returned without a second acquisition.
    pub async fn force_refresh(
        &self,
        rejected: &SessionCredential,
    ) -> Option<Arc<SessionCredential>> {
        {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(c) if c.generation() == rejected.generation() => {
                    *current = Some(Arc::new(c.invalidated()));
                }
                Some(c) if c.generation() > rejected.generation() && c.is_valid_at(Utc::now()) => {
                    debug!(
                        rejected = rejected.generation(),
                        current = c.generation(),
                        "credential already replaced"
                    );
                    return Some(c.clone());
                }
                _ => {}
            }
        }

        info!(generation = rejected.generation(), "forcing session refresh");
        self.refresh().await
    }

    pub fn status(&self) -> CredentialSnapshot {
        let current = self.current();
        let now = Utc::now();
        let state = match &current {
            None => CredentialState::Missing,
            Some(c) if c.is_valid_at(now) => CredentialState::Valid {
                expires_in_secs: (c.expires_at() - now).num_seconds(),
            },
            Some(_) => CredentialState::Expired,
        };
        CredentialSnapshot {
            state,
            refreshing: self.is_refreshing(),
            generation: current.map(|c| c.generation()).unwrap_or(0),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_owner.load(Ordering::Acquire) != 0
    }

    /// Re-validate on `check_interval` and refresh ahead of expiry.
    ///
    /// The first check runs immediately, which doubles as the initial
    /// acquisition at startup.
    pub fn spawn_background_refresh(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.inner.settings.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if manager.is_refreshing() || !manager.needs_refresh(Utc::now()) {
                    continue;
                }
                debug!("proactive session refresh");
                if manager.refresh().await.is_none() {
                    warn!("proactive session refresh did not produce a credential");
                }
            }
        })
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(self.inner.settings.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        match self.current() {
            None => true,
            Some(c) => !c.is_valid_at(now + margin),
        }
    }

    fn current(&self) -> Option<Arc<SessionCredential>> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_valid(&self) -> Option<Arc<SessionCredential>> {
        self.current().filter(|c| c.is_valid_at(Utc::now()))
    }

    /// Run or join a refresh, waiting at most `refresh_wait`.
    async fn refresh(&self) -> Option<Arc<SessionCredential>> {
        let deadline = Instant::now() + self.inner.settings.refresh_wait;

        // Register interest before inspecting the flag so a refresh finishing
        // in between cannot be missed.
        let notified = self.inner.refreshed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(ticket) = self.try_begin_refresh() {
            let handle = self.spawn_refresh(ticket);
            return match timeout_at(deadline, handle).await {
                Ok(Ok(credential)) => credential,
                Ok(Err(e)) => {
                    warn!(error = %e, "session refresh task failed");
                    None
                }
                Err(_) => {
                    warn!(
                        wait = ?self.inner.settings.refresh_wait,
                        "session refresh still running after wait budget"
                    );
                    None
                }
            };
        }

        debug!("waiting for in-flight session refresh");
        let observed = self.inner.refresh_owner.load(Ordering::Acquire);
        if timeout_at(deadline, notified).await.is_ok() {
            return self.current_valid();
        }

        // The refresh we waited on never finished. Assume its worker is stuck,
        // take the flag over and start a new acquisition for later callers.
        if observed != 0
            && self
                .inner
                .refresh_owner
                .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!(ticket = observed, "clearing stuck session refresh");
        }
        if let Some(ticket) = self.try_begin_refresh() {
            drop(self.spawn_refresh(ticket));
        }
        self.current_valid()
    }

    fn try_begin_refresh(&self) -> Option<u64> {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.inner
            .refresh_owner
            .compare_exchange(0, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ticket)
    }

    /// Acquisition runs on its own task so that a caller being cancelled (for
    /// instance a client disconnecting) never abandons it half-way.
    fn spawn_refresh(&self, ticket: u64) -> JoinHandle<Option<Arc<SessionCredential>>> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = RefreshGuard {
                inner: inner.clone(),
                ticket,
            };
            inner.acquire_and_install().await
        })
    }
}

impl Inner {
    async fn acquire_and_install(&self) -> Option<Arc<SessionCredential>> {
        let fingerprint = Fingerprint::random();
        let started = Instant::now();
        info!(
            acquirer = self.acquirer.name(),
            user_agent = %fingerprint.user_agent,
            "acquiring upstream session"
        );

        let raw = match self.acquirer.acquire_session(&fingerprint).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(elapsed = ?started.elapsed(), "session acquirer returned no cookies");
                return None;
            }
            Err(e) => {
                warn!(error = %e, elapsed = ?started.elapsed(), "session acquisition failed");
                return None;
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let credential = match SessionCredential::from_raw(
            &raw,
            &self.settings.auth_cookie,
            &self.settings.expiry,
            fingerprint,
            Utc::now(),
            generation,
        ) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(error = %e, cookies = raw.cookies.len(), "rejecting acquired session");
                return None;
            }
        };

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());

        info!(
            generation,
            expires_at = %credential.expires_at(),
            elapsed = ?started.elapsed(),
            "session credential installed"
        );
        Some(credential)
    }
}
