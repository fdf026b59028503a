//! Atomic per-key rate-limit reservation (port interface).
//!
//! The backend performs the RPM and TPM check-and-increment as a single
//! atomic step per key. Contract: RPM is reserved first, then TPM; when the
//! TPM reservation fails, the RPM slot is released in the same atomic step.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of an atomic reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReservationOutcome {
    /// Both windows had capacity; counters were incremented.
    Granted {
        remaining_rpm: u32,
        remaining_tpm: u64,
    },
    /// One of the windows was full; no counters were changed.
    Denied,
}

impl ReservationOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The backend is unreachable. The caller switches to permissive mode.
    #[error("Rate limit backend unreachable: {0}")]
    BackendUnavailable(String),
}

/// Port interface for the windowed reservation store.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Atomically reserve one request against the per-minute RPM window and
    /// `tokens` against the per-minute TPM window for `key_id`.
    async fn reserve(
        &self,
        key_id: &str,
        tokens: u64,
        rpm_limit: u32,
        tpm_limit: u64,
    ) -> Result<ReservationOutcome, RateLimitError>;

    /// Remaining capacity in the current windows without reserving.
    /// Used for capacity-weighted key selection.
    async fn remaining(
        &self,
        key_id: &str,
        rpm_limit: u32,
        tpm_limit: u64,
    ) -> Result<(u32, u64), RateLimitError>;
}
