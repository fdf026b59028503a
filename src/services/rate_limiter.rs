//! Windowed RPM/TPM reservation.
//!
//! `InMemoryRateLimitBackend` keeps one minute-window record per key behind a
//! single mutex, so the RPM check, TPM check, and both increments happen as
//! one atomic step. `RateLimiterService` wraps a backend and degrades to
//! permissive mode (allow the call, log a warning) when the backend is
//! unreachable — availability takes precedence over strict limiting during a
//! backend outage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::ports::{RateLimitBackend, RateLimitError, ReservationOutcome};

/// Counters survive slightly past their window to absorb clock skew between
/// reserving processes.
const WINDOW_GRACE_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, Default)]
struct KeyWindow {
    /// Unix minute this window covers
    minute: i64,
    rpm_used: u32,
    tpm_used: u64,
}

impl KeyWindow {
    fn roll_if_expired(&mut self, now: DateTime<Utc>) {
        let current_minute = now.timestamp() / 60;
        if self.minute != current_minute {
            // Keep the stale window alive for the grace period
            let window_end = (self.minute + 1) * 60 + WINDOW_GRACE_SECS;
            if now.timestamp() >= window_end {
                *self = KeyWindow {
                    minute: current_minute,
                    rpm_used: 0,
                    tpm_used: 0,
                };
            }
        }
    }
}

/// In-process reservation backend. A distributed deployment swaps this for a
/// KV-backed implementation with a scripted check-and-increment behind the
/// same port.
#[derive(Default)]
pub struct InMemoryRateLimitBackend {
    windows: Mutex<HashMap<String, KeyWindow>>,
}

impl InMemoryRateLimitBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitBackend for InMemoryRateLimitBackend {
    async fn reserve(
        &self,
        key_id: &str,
        tokens: u64,
        rpm_limit: u32,
        tpm_limit: u64,
    ) -> Result<ReservationOutcome, RateLimitError> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key_id.to_string()).or_default();
        let now = Utc::now();
        if window.minute == 0 {
            window.minute = now.timestamp() / 60;
        }
        window.roll_if_expired(now);

        // RPM first. If it fails, nothing was incremented.
        if window.rpm_used >= rpm_limit {
            return Ok(ReservationOutcome::Denied);
        }
        window.rpm_used += 1;

        // Then TPM; release the RPM slot if the token window is full. Both
        // steps happen under the same lock, so the pair is atomic.
        if window.tpm_used + tokens > tpm_limit {
            window.rpm_used -= 1;
            return Ok(ReservationOutcome::Denied);
        }
        window.tpm_used += tokens;

        Ok(ReservationOutcome::Granted {
            remaining_rpm: rpm_limit - window.rpm_used,
            remaining_tpm: tpm_limit - window.tpm_used,
        })
    }

    async fn remaining(
        &self,
        key_id: &str,
        rpm_limit: u32,
        tpm_limit: u64,
    ) -> Result<(u32, u64), RateLimitError> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key_id.to_string()).or_default();
        window.roll_if_expired(Utc::now());
        Ok((
            rpm_limit.saturating_sub(window.rpm_used),
            tpm_limit.saturating_sub(window.tpm_used),
        ))
    }
}

/// Reservation front used by the key manager.
pub struct RateLimiterService {
    backend: Arc<dyn RateLimitBackend>,
}

impl RateLimiterService {
    pub fn new(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitBackend::new()))
    }

    /// Attempt an atomic reservation. Backend unavailability degrades to a
    /// permissive grant.
    pub async fn try_reserve(
        &self,
        key_id: &str,
        tokens: u64,
        rpm_limit: u32,
        tpm_limit: u64,
    ) -> ReservationOutcome {
        match self.backend.reserve(key_id, tokens, rpm_limit, tpm_limit).await {
            Ok(outcome) => outcome,
            Err(RateLimitError::BackendUnavailable(reason)) => {
                warn!(
                    key_id,
                    reason, "rate limit backend unreachable; permissive mode"
                );
                ReservationOutcome::Granted {
                    remaining_rpm: rpm_limit,
                    remaining_tpm: tpm_limit,
                }
            }
        }
    }

    /// Remaining capacity snapshot; permissive (full capacity) when the
    /// backend is unreachable.
    pub async fn remaining(&self, key_id: &str, rpm_limit: u32, tpm_limit: u64) -> (u32, u64) {
        match self.backend.remaining(key_id, rpm_limit, tpm_limit).await {
            Ok(remaining) => remaining,
            Err(RateLimitError::BackendUnavailable(_)) => (rpm_limit, tpm_limit),
        }
    }
}
