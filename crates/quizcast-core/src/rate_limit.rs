//! Per-client request admission.
//!
//! One keyed token-bucket limiter per [`RouteClass`], each keyed by the
//! client identity (the first `X-Forwarded-For` hop or the peer address).
//! Buckets are created on first use; a periodic janitor discards buckets
//! that have refilled completely so the maps stay bounded by the number
//! of recently active clients.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota as GovernorQuota, RateLimiter};
use tokio::sync::watch;

use crate::config::{Quota, RateLimitConfig};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Groups of routes sharing one quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Moderator endpoints under `/api/admin`.
    Admin,
    /// Login and token endpoints under `/api/auth`.
    Auth,
    /// Answer submission under `/api/answers`.
    Submission,
    /// Everything else.
    Default,
}

impl RouteClass {
    /// Classify a request path.
    pub fn classify(path: &str) -> Self {
        if path.starts_with("/api/admin") {
            Self::Admin
        } else if path.starts_with("/api/auth") {
            Self::Auth
        } else if path.starts_with("/api/answers") {
            Self::Submission
        } else {
            Self::Default
        }
    }

    /// Name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Auth => "auth",
            Self::Submission => "submission",
            Self::Default => "default",
        }
    }
}

impl core::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token-bucket gate for incoming requests.
pub struct AdmissionControl {
    admin: KeyedLimiter,
    auth: KeyedLimiter,
    submission: KeyedLimiter,
    default: KeyedLimiter,
    idle_sweep: Duration,
}

impl core::fmt::Debug for AdmissionControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdmissionControl")
            .field("tracked_keys", &self.tracked_keys())
            .field("idle_sweep", &self.idle_sweep)
            .finish_non_exhaustive()
    }
}

fn keyed(quota: Quota) -> KeyedLimiter {
    let per_minute = NonZeroU32::new(quota.per_minute).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(quota.burst).unwrap_or(per_minute);
    RateLimiter::keyed(GovernorQuota::per_minute(per_minute).allow_burst(burst))
}

impl AdmissionControl {
    /// Build the limiters from configuration.
    ///
    /// Zero quotas are rejected by config validation; here they fall back
    /// to one request per minute.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            admin: keyed(config.admin),
            auth: keyed(config.auth),
            submission: keyed(config.submission),
            default: keyed(config.default),
            idle_sweep: Duration::from_secs(config.idle_sweep_secs.max(1)),
        }
    }

    const fn limiter(&self, class: RouteClass) -> &KeyedLimiter {
        match class {
            RouteClass::Admin => &self.admin,
            RouteClass::Auth => &self.auth,
            RouteClass::Submission => &self.submission,
            RouteClass::Default => &self.default,
        }
    }

    /// Take one token from the client's bucket for `class`. Returns
    /// `false` when the bucket is empty.
    pub fn allow(&self, client: &str, class: RouteClass) -> bool {
        self.limiter(class).check_key(&client.to_owned()).is_ok()
    }

    /// Number of live buckets across all classes.
    pub fn tracked_keys(&self) -> usize {
        [RouteClass::Admin, RouteClass::Auth, RouteClass::Submission, RouteClass::Default]
            .into_iter()
            .map(|class| self.limiter(class).len())
            .fold(0, usize::saturating_add)
    }

    /// Drop buckets that have refilled completely.
    pub fn discard_idle(&self) {
        for limiter in [&self.admin, &self.auth, &self.submission, &self.default] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Periodically discard idle buckets until `shutdown` flips to `true`
    /// or its sender is dropped.
    pub async fn run_janitor(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.idle_sweep);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.discard_idle();
                    let tracked = self.tracked_keys();
                    tracing::debug!(tracked, "Discarded idle rate-limit buckets");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
