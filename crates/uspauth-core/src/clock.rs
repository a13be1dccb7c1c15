//! Time sources.
//!
//! The engine never calls `Utc::now()` directly; every read goes through a
//! `Clock` so tests can drive time deterministically, and through a
//! `ClockGuard` so a clock stepping backward is caught instead of silently
//! turning an expired credential valid again.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::error;

use crate::error::AuthError;

/// Source of the current time. Must be side-effect free.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wraps a `Clock` and rejects readings earlier than the latest one seen.
pub struct ClockGuard {
    clock: Arc<dyn Clock>,
    tolerance: Duration,
    high_water: Mutex<Option<DateTime<Utc>>>,
}

impl ClockGuard {
    pub fn new(clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        Self {
            clock,
            tolerance: tolerance.max(Duration::zero()),
            high_water: Mutex::new(None),
        }
    }

    /// Read the clock, failing with `ClockRegression` if it went backward by
    /// more than the configured tolerance.
    pub fn now(&self) -> Result<DateTime<Utc>, AuthError> {
        let now = self.clock.now();
        let mut high_water = self.high_water.lock().unwrap_or_else(|e| e.into_inner());
        match *high_water {
            Some(previous)
                if now
                    .checked_add_signed(self.tolerance)
                    .is_some_and(|latest| latest < previous) =>
            {
                error!(%previous, %now, "Clock moved backward");
                Err(AuthError::ClockRegression { previous, now })
            }
            Some(previous) if now <= previous => Ok(previous),
            _ => {
                *high_water = Some(now);
                Ok(now)
            }
        }
    }
}
