//! API key metadata and runtime health.
//!
//! Secret material is never stored here; it is fetched on demand from the
//! SecretStore by key id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cooldown backoff seed: 30 seconds, doubling per consecutive error.
pub const COOLDOWN_BASE_SECS: i64 = 30;

/// Cooldown cap: one hour.
pub const COOLDOWN_MAX_SECS: i64 = 3600;

/// Static metadata for one API key. Loaded from the key catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyMetadata {
    pub key_id: String,
    /// Exact model name this key serves
    pub model_name: String,
    pub provider: String,
    /// Requests per minute
    pub rpm: u32,
    /// Tokens per minute
    pub tpm: u64,
    /// Requests per day; carried but not enforced by the minute windows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpd: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Tier tag used for safety-block escalation ("light" / "heavy")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_tag: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl ApiKeyMetadata {
    pub fn new(
        key_id: impl Into<String>,
        model_name: impl Into<String>,
        provider: impl Into<String>,
        rpm: u32,
        tpm: u64,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            model_name: model_name.into(),
            provider: provider.into(),
            rpm,
            tpm,
            rpd: None,
            burst_capacity: None,
            priority: None,
            workload_tag: None,
            active: true,
            tags: Vec::new(),
        }
    }

    pub fn with_workload_tag(mut self, tag: impl Into<String>) -> Self {
        self.workload_tag = Some(tag.into());
        self
    }

    /// Whether this key matches the preference exactly, or by model family
    /// when fallback widening is enabled (prefix match up to the last `-`).
    pub fn matches_model(&self, preference: &str, widen_to_family: bool) -> bool {
        if self.model_name == preference {
            return true;
        }
        if widen_to_family {
            let family = |name: &str| {
                name.rsplit_once('-')
                    .map_or_else(|| name.to_string(), |(head, _)| head.to_string())
            };
            return family(&self.model_name) == family(preference);
        }
        false
    }
}

/// On-disk key catalog: `{keys: [...], fallback_order: [...]?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyCatalog {
    pub keys: Vec<ApiKeyMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_order: Option<Vec<String>>,
}

impl KeyCatalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Runtime-only key health. Exclusively mutated by the KeyManager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyHealth {
    pub last_used: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
    /// Consecutive errors since the last success; drives the cooldown length
    pub consecutive_errors: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl KeyHealth {
    /// Record a successful call: clears cooldown and the consecutive-error run.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_used = Some(now);
        self.success_count += 1;
        self.consecutive_errors = 0;
        self.cooldown_until = None;
    }

    /// Record a failed call and enter cooldown.
    ///
    /// Backoff is exponential seeded at [`COOLDOWN_BASE_SECS`], doubling per
    /// consecutive error, capped at [`COOLDOWN_MAX_SECS`].
    pub fn record_error(&mut self, now: DateTime<Utc>) {
        self.last_used = Some(now);
        self.error_count += 1;
        self.consecutive_errors += 1;
        let exp = self.consecutive_errors.saturating_sub(1).min(30);
        let secs = COOLDOWN_BASE_SECS
            .saturating_mul(1_i64 << exp)
            .min(COOLDOWN_MAX_SECS);
        self.cooldown_until = Some(now + Duration::seconds(secs));
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}
