//! Credential manager behaviour under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatbridge_auth::{
    AuthError, CredentialManager, CredentialSettings, CredentialState, Fingerprint, RawCookie,
    RawSession, Result, SessionAcquirer,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Hands out `session_token=tok-N`, counting how often it was called.
struct CountingAcquirer {
    calls: AtomicUsize,
    delay: Duration,
    cookie: &'static str,
}

impl CountingAcquirer {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            cookie: "session_token",
        })
    }

    fn without_marker() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            cookie: "unrelated",
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionAcquirer for CountingAcquirer {
    async fn acquire_session(&self, _fingerprint: &Fingerprint) -> Result<Option<RawSession>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(Some(RawSession::new(vec![
            RawCookie::new(self.cookie, format!("tok-{}", n)).with_max_age(3600),
            RawCookie::new("cf_clearance", "clear"),
        ])))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

struct EmptyAcquirer;

#[async_trait]
impl SessionAcquirer for EmptyAcquirer {
    async fn acquire_session(&self, _fingerprint: &Fingerprint) -> Result<Option<RawSession>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "empty"
    }
}

/// Succeeds once, then the challenge starts failing.
#[derive(Default)]
struct OneShotAcquirer {
    used: AtomicUsize,
}

#[async_trait]
impl SessionAcquirer for OneShotAcquirer {
    async fn acquire_session(&self, _fingerprint: &Fingerprint) -> Result<Option<RawSession>> {
        if self.used.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(None);
        }
        Ok(Some(RawSession::new(vec![RawCookie::new(
            "session_token",
            "only-once",
        )])))
    }

    fn name(&self) -> &str {
        "one-shot"
    }
}

fn settings(refresh_wait: Duration) -> CredentialSettings {
    CredentialSettings {
        refresh_wait,
        check_interval: Duration::from_millis(20),
        ..CredentialSettings::default()
    }
}

// ---------------------------------------------------------------------------
// ensure()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ensure_acquires_once_then_reuses() {
    let acquirer = CountingAcquirer::new(Duration::ZERO);
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(5)));

    let first = manager.ensure().await.unwrap();
    let second = manager.ensure().await.unwrap();

    assert_eq!(acquirer.calls(), 1);
    assert_eq!(first.cookie_header(), "session_token=tok-1; cf_clearance=clear");
    assert_eq!(first.generation(), second.generation());
}

#[tokio::test]
async fn test_concurrent_ensure_runs_single_refresh() {
    let acquirer = CountingAcquirer::new(Duration::from_millis(100));
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(5)));

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure().await })
        })
        .collect();

    for caller in callers {
        let credential = caller.await.unwrap().unwrap();
        assert_eq!(credential.cookie_header(), "session_token=tok-1; cf_clearance=clear");
    }
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn test_ensure_unavailable_when_acquirer_yields_nothing() {
    let manager =
        CredentialManager::new(Arc::new(EmptyAcquirer), settings(Duration::from_secs(1)));

    let err = manager.ensure().await.unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert_eq!(manager.status().state, CredentialState::Missing);
    assert!(!manager.is_refreshing());
}

#[tokio::test]
async fn test_ensure_rejects_session_without_marker() {
    let acquirer = CountingAcquirer::without_marker();
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(1)));

    assert!(manager.ensure().await.is_err());
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn test_ensure_gives_up_after_wait_budget() {
    let acquirer = CountingAcquirer::new(Duration::from_secs(10));
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_millis(50)));

    let started = std::time::Instant::now();
    let err = manager.ensure().await.unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
    // The acquisition keeps running on its own task.
    assert!(manager.is_refreshing());
}

#[tokio::test]
async fn test_waiter_clears_stuck_refresh() {
    let acquirer = CountingAcquirer::new(Duration::from_millis(300));
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_millis(50)));

    // Leader times out but its acquisition keeps the flag.
    assert!(manager.ensure().await.is_err());
    assert!(manager.is_refreshing());

    // A waiter exhausts its budget, takes the flag over and starts its own.
    assert!(manager.ensure().await.is_err());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(acquirer.calls(), 2);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(manager.ensure().await.is_ok());
    assert!(!manager.is_refreshing());
}

// ---------------------------------------------------------------------------
// force_refresh()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_force_refresh_replaces_rejected_token() {
    let acquirer = CountingAcquirer::new(Duration::ZERO);
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(5)));

    let stale = manager.ensure().await.unwrap();
    let fresh = manager.force_refresh(&stale).await.unwrap();

    assert_ne!(fresh.cookie_header(), stale.cookie_header());
    assert!(fresh.generation() > stale.generation());

    for _ in 0..3 {
        let current = manager.ensure().await.unwrap();
        assert_ne!(current.cookie_header(), stale.cookie_header());
    }
    assert_eq!(acquirer.calls(), 2);
}

#[tokio::test]
async fn test_force_refresh_with_superseded_credential_skips_acquisition() {
    let acquirer = CountingAcquirer::new(Duration::ZERO);
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(5)));

    let stale = manager.ensure().await.unwrap();
    let fresh = manager.force_refresh(&stale).await.unwrap();

    // A second request that was rejected with the same stale token.
    let again = manager.force_refresh(&stale).await.unwrap();
    assert_eq!(again.generation(), fresh.generation());
    assert_eq!(acquirer.calls(), 2);
}

#[tokio::test]
async fn test_failed_force_refresh_never_revives_stale_token() {
    let manager = CredentialManager::new(
        Arc::new(OneShotAcquirer::default()),
        settings(Duration::from_secs(1)),
    );

    let stale = manager.ensure().await.unwrap();
    assert!(manager.force_refresh(&stale).await.is_none());

    assert!(matches!(
        manager.ensure().await.unwrap_err(),
        AuthError::Unavailable(_)
    ));
    assert_eq!(manager.status().state, CredentialState::Expired);
}

// ---------------------------------------------------------------------------
// Background refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_background_refresh_populates_credential() {
    let acquirer = CountingAcquirer::new(Duration::ZERO);
    let manager = CredentialManager::new(acquirer.clone(), settings(Duration::from_secs(5)));

    let handle = manager.spawn_background_refresh();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = manager.status();
    assert!(matches!(snapshot.state, CredentialState::Valid { .. }));
    assert_eq!(snapshot.generation, 1);
    // Well inside the 5 minute margin of a 1 hour session: no churn.
    assert_eq!(acquirer.calls(), 1);

    manager.ensure().await.unwrap();
    assert_eq!(acquirer.calls(), 1);
    handle.abort();
}

#[tokio::test]
async fn test_background_refresh_renews_inside_margin() {
    let acquirer = CountingAcquirer::new(Duration::ZERO);
    let manager = CredentialManager::new(
        acquirer.clone(),
        CredentialSettings {
            check_interval: Duration::from_millis(20),
            // Larger than the 1 hour session lifetime: always due.
            refresh_margin: Duration::from_secs(2 * 3600),
            ..CredentialSettings::default()
        },
    );

    let handle = manager.spawn_background_refresh();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.abort();

    assert!(acquirer.calls() >= 2);
}
