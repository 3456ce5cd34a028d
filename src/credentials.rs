//! Credential pool
//!
//! Admission control for the primary provider: N access tokens, each of
//! which may be dispatched at most once per `min_interval`. A rate-limit
//! signal from the provider penalizes the token that caused it, pushing its
//! last-use stamp into the future so rotation skips it for a cool-down.
//!
//! Total outbound call rate is therefore bounded by
//! `credential_count / min_interval`.
//!
//! ## Usage
//!
//! ```no_run
//! use route_risk_orchestrator::credentials::CredentialPool;
//! use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() -> Result<(), route_risk_orchestrator::RiskError> {
//! let pool = CredentialPool::new(
//!     vec!["key-a".to_string(), "key-b".to_string()],
//!     Duration::from_millis(200),
//! )?;
//!
//! let credential = pool.acquire().await; // suspends until one is eligible
//! // ... call the provider; on a rate-limit response:
//! pool.penalize(&credential);
//! # Ok(()) }
//! ```

use crate::RiskError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default cool-down applied by [`CredentialPool::penalize`].
pub const DEFAULT_PENALTY: Duration = Duration::from_secs(5);

/// Default back-off between scans when no credential is eligible.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An opaque provider access token.
///
/// Cheap to clone. `Debug`/`Display` print a masked form so tokens never
/// end up in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building provider requests.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

struct Slot {
    credential: Credential,
    /// `None` until first dispatch. May lie in the future after a penalty.
    last_used: Option<Instant>,
}

impl Slot {
    fn eligible(&self, now: Instant, min_interval: Duration) -> bool {
        match self.last_used {
            None => true,
            // Penalized stamps lie in the future; `checked_duration_since`
            // returns `None` for them, keeping the slot ineligible.
            Some(last) => now
                .checked_duration_since(last)
                .is_some_and(|elapsed| elapsed >= min_interval),
        }
    }
}

/// Shared pool of rate-limited credentials.
///
/// Clones share the same slots.
#[derive(Clone)]
pub struct CredentialPool {
    slots: Arc<Mutex<Vec<Slot>>>,
    min_interval: Duration,
    penalty: Duration,
    poll_interval: Duration,
}

impl CredentialPool {
    /// Create a pool with the default cool-down (5 s) and poll back-off (50 ms).
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::ConfigError`] if `tokens` is empty: an empty
    /// pool would suspend every caller forever.
    pub fn new(tokens: Vec<String>, min_interval: Duration) -> Result<Self, RiskError> {
        Self::with_timing(tokens, min_interval, DEFAULT_PENALTY, DEFAULT_POLL_INTERVAL)
    }

    /// Create a pool with explicit cool-down and poll back-off.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::ConfigError`] if `tokens` is empty or
    /// `poll_interval` is zero.
    pub fn with_timing(
        tokens: Vec<String>,
        min_interval: Duration,
        penalty: Duration,
        poll_interval: Duration,
    ) -> Result<Self, RiskError> {
        if tokens.is_empty() {
            return Err(RiskError::ConfigError(
                "credential pool requires at least one credential".into(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(RiskError::ConfigError(
                "credential poll interval must be > 0".into(),
            ));
        }

        let slots = tokens
            .into_iter()
            .map(|token| Slot {
                credential: Credential::new(token),
                last_used: None,
            })
            .collect();

        Ok(Self {
            slots: Arc::new(Mutex::new(slots)),
            min_interval,
            penalty,
            poll_interval,
        })
    }

    /// Take the first eligible credential, stamping it used, or `None` if
    /// every credential is still inside its interval.
    pub fn try_acquire(&self) -> Option<Credential> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.eligible(now, self.min_interval))?;
        slot.last_used = Some(now);
        debug!(credential = %slot.credential, "credential dispatched");
        Some(slot.credential.clone())
    }

    /// Wait for an eligible credential.
    ///
    /// Never fails, only delays: under sustained contention callers must not
    /// assume bounded latency.
    pub async fn acquire(&self) -> Credential {
        loop {
            if let Some(credential) = self.try_acquire() {
                return credential;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Cool a credential down after the provider signalled a rate limit.
    ///
    /// The credential stays in rotation; it becomes eligible again
    /// `penalty + min_interval` from now. Unknown credentials are ignored.
    pub fn penalize(&self, credential: &Credential) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| &s.credential == credential) {
            slot.last_used = Some(Instant::now() + self.penalty);
            warn!(
                credential = %credential,
                penalty_ms = self.penalty.as_millis() as u64,
                "credential rate limited, cooling down"
            );
        }
    }

    /// Number of credentials in rotation.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Always `false` for a constructed pool; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Configured minimum interval between dispatches of one credential.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
