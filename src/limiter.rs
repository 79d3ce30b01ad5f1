//! Global fixed-window admission control for decrypt requests.
//!
//! One [`RateLimiter`] holds a single [`RateWindow`] behind a mutex. Every
//! admission and every telemetry read takes that lock, so a weighted request
//! is checked and charged as one unit and concurrent callers can never push
//! `used` past `allowed`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Source of the current time; swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub allowed: u32,
    pub period_seconds: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            allowed: 100,
            period_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub allowed: u32,
    pub used: u32,
    pub period_seconds: u32,
    pub expires_at: DateTime<Utc>,
}

impl RateWindow {
    fn fresh(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            allowed: config.allowed,
            used: 0,
            period_seconds: config.period_seconds,
            expires_at: now + Duration::seconds(i64::from(config.period_seconds)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self) -> u32 {
        self.allowed.saturating_sub(self.used)
    }

    fn seconds_to_expiry(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired(now) {
            -1
        } else {
            (self.expires_at - now).num_seconds()
        }
    }
}

/// Quota numbers echoed back to clients on every decrypt response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaTelemetry {
    pub limit: u32,
    pub remaining: u32,
    pub resets_in: i64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = RateWindow::fresh(config, clock.now());
        Self {
            config,
            clock,
            window: Mutex::new(window),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Charges `cost` against the current window if it fits, replacing an
    /// expired window first. A rejected call leaves the window untouched.
    pub async fn try_admit(&self, cost: u32) -> bool {
        let mut window = self.window.lock().await;
        let now = self.clock.now();
        if window.is_expired(now) {
            *window = RateWindow::fresh(self.config, now);
            tracing::debug!(expires_at = %window.expires_at, "rate window renewed");
        }
        match window.used.checked_add(cost) {
            Some(total) if total <= window.allowed => {
                window.used = total;
                true
            }
            _ => false,
        }
    }

    pub async fn remaining(&self) -> u32 {
        self.window.lock().await.remaining()
    }

    pub async fn seconds_to_expiry(&self) -> i64 {
        let window = self.window.lock().await;
        window.seconds_to_expiry(self.clock.now())
    }

    /// Consistent view of limit, remaining and reset time from one lock hold.
    pub async fn telemetry(&self) -> QuotaTelemetry {
        let window = self.window.lock().await;
        let now = self.clock.now();
        QuotaTelemetry {
            limit: window.allowed,
            remaining: window.remaining(),
            resets_in: window.seconds_to_expiry(now),
        }
    }

    pub async fn snapshot(&self) -> RateWindow {
        self.window.lock().await.clone()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
