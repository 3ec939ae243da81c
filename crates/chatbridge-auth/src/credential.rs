use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::{AuthError, Fingerprint, Result};

/// A single cookie as declared by the upstream, with its expiring attributes.
#[derive(Clone, PartialEq, Eq)]
pub struct RawCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
}

impl std::fmt::Debug for RawCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("expires", &self.expires)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl RawCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            max_age: None,
        }
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Parse a `Set-Cookie` header value.
    ///
    /// Only the attributes relevant to expiry are kept; anything unparseable
    /// is dropped rather than failing the whole cookie.
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self::new(name, value.trim().trim_matches('"'));
        for attr in parts {
            let Some((key, val)) = attr.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "expires" => cookie.expires = parse_cookie_date(val.trim()),
                "max-age" => cookie.max_age = val.trim().parse().ok(),
                _ => {}
            }
        }
        Some(cookie)
    }

    /// The instant this cookie stops being valid, as seen from `acquired_at`.
    ///
    /// `Max-Age` takes precedence over `Expires`.
    pub fn expiry(&self, acquired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.max_age {
            Some(seconds) => Some(
                Duration::try_seconds(seconds)
                    .and_then(|age| acquired_at.checked_add_signed(age))
                    .unwrap_or(if seconds > 0 {
                        DateTime::<Utc>::MAX_UTC
                    } else {
                        DateTime::<Utc>::MIN_UTC
                    }),
            ),
            None => self.expires,
        }
    }
}

/// `at + ttl`, saturating at the latest representable instant.
fn saturating_add(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Netscape-style dates: "Wed, 21-Oct-2015 07:28:00 GMT"
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// The cookie set returned by a [`crate::SessionAcquirer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSession {
    pub cookies: Vec<RawCookie>,
}

impl RawSession {
    pub fn new(cookies: Vec<RawCookie>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Last declaration wins when a cookie name repeats.
    pub fn cookie(&self, name: &str) -> Option<&RawCookie> {
        self.cookies.iter().rev().find(|c| c.name == name)
    }

    /// Serialize as a `Cookie` request header value.
    pub fn header_value(&self) -> String {
        let mut seen = std::collections::HashSet::new();
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .rev()
            .filter(|c| seen.insert(c.name.as_str()))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        pairs.reverse();
        pairs.join("; ")
    }
}

/// How long a session is trusted when the cookies themselves say little.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(30),
            max_ttl: Duration::hours(12),
        }
    }
}

impl ExpiryPolicy {
    /// Derive the expiry of a freshly acquired session.
    ///
    /// The authentication cookie's own expiry is the most authoritative
    /// signal; failing that the earliest expiry of any other cookie bounds the
    /// session; failing that `default_ttl` applies. Past expiries are ignored
    /// and the result never exceeds `max_ttl`.
    pub fn derive(
        &self,
        session: &RawSession,
        auth_cookie: &str,
        acquired_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let future = |c: &RawCookie| c.expiry(acquired_at).filter(|at| *at > acquired_at);

        let declared = session.cookie(auth_cookie).and_then(future).or_else(|| {
            session
                .cookies
                .iter()
                .filter(|c| c.name != auth_cookie)
                .filter_map(future)
                .min()
        });

        let expires_at = declared.unwrap_or_else(|| saturating_add(acquired_at, self.default_ttl));
        expires_at.min(saturating_add(acquired_at, self.max_ttl))
    }
}

/// The authoritative upstream session.
///
/// Instances are immutable; the manager swaps whole values so readers never
/// observe a half-written token.
pub struct SessionCredential {
    token: SecretString,
    fingerprint: Fingerprint,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("user_agent", &self.fingerprint.user_agent)
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

impl SessionCredential {
    /// Build a credential from an acquired cookie set.
    ///
    /// Fails when the cookie carrying the authentication marker is absent.
    pub fn from_raw(
        session: &RawSession,
        auth_cookie: &str,
        policy: &ExpiryPolicy,
        fingerprint: Fingerprint,
        acquired_at: DateTime<Utc>,
        generation: u64,
    ) -> Result<Self> {
        match session.cookie(auth_cookie) {
            Some(c) if !c.value.is_empty() => {}
            _ => return Err(AuthError::MissingAuthMarker(auth_cookie.to_string())),
        }

        Ok(Self {
            token: SecretString::from(session.header_value()),
            expires_at: policy.derive(session, auth_cookie, acquired_at),
            fingerprint,
            acquired_at,
            generation,
        })
    }

    /// The serialized cookie set, ready for a `Cookie` header.
    pub fn cookie_header(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Copy of this credential marked as expired.
    pub fn invalidated(&self) -> Self {
        Self {
            token: SecretString::from(self.token.expose_secret().to_string()),
            fingerprint: self.fingerprint.clone(),
            acquired_at: self.acquired_at,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            generation: self.generation,
        }
    }
}
