//! API key catalog, selection, and health tracking.
//!
//! Selection composes model filtering, cooldown exclusion, and an atomic
//! RPM/TPM reservation per candidate. Candidates are tried in a random order
//! weighted by remaining window capacity so a single hot key does not absorb
//! every request. `report_success` / `report_error` are the only health
//! mutators.

use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::models::api_key::{ApiKeyMetadata, KeyCatalog, KeyHealth};
use crate::domain::ports::{RouterError, Secret, SecretStore};

use super::rate_limiter::RateLimiterService;

/// A key picked for one provider call. The secret is fetched fresh from the
/// SecretStore during selection and is never cached across requests.
#[derive(Debug)]
pub struct SelectedKey {
    pub key_id: String,
    pub secret: Secret,
    pub model_name: String,
    pub workload_tag: Option<String>,
}

/// Constraints for one selection.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    /// Exact model name wanted; family-widened if enabled and no exact match
    pub model_preference: String,
    /// When set, restrict candidates to keys carrying this workload tag
    /// (used by safety-block tier escalation)
    pub workload_tag: Option<String>,
    pub expected_completion_tokens: u64,
    pub excluded_keys: HashSet<String>,
}

/// Per-key health snapshot returned by `get_health_status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyHealthStatus {
    pub active: bool,
    pub last_used: Option<chrono::DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
    pub cooldown_until: Option<chrono::DateTime<Utc>>,
    pub in_cooldown: bool,
}

pub struct KeyManager {
    catalog: RwLock<Vec<ApiKeyMetadata>>,
    health: RwLock<HashMap<String, KeyHealth>>,
    limiter: Arc<RateLimiterService>,
    secrets: Arc<dyn SecretStore>,
    model_family_fallback: bool,
}

impl KeyManager {
    pub fn new(
        catalog: KeyCatalog,
        limiter: Arc<RateLimiterService>,
        secrets: Arc<dyn SecretStore>,
        model_family_fallback: bool,
    ) -> Self {
        Self {
            catalog: RwLock::new(catalog.keys),
            health: RwLock::new(HashMap::new()),
            limiter,
            secrets,
            model_family_fallback,
        }
    }

    /// Swap the catalog at runtime. Health counters are preserved for keys
    /// that survive the reload.
    pub async fn reload(&self, catalog: KeyCatalog) {
        let surviving: HashSet<String> =
            catalog.keys.iter().map(|k| k.key_id.clone()).collect();
        {
            let mut health = self.health.write().await;
            health.retain(|key_id, _| surviving.contains(key_id));
        }
        let count = catalog.keys.len();
        *self.catalog.write().await = catalog.keys;
        info!(keys = count, "key catalog reloaded");
    }

    /// Select a usable key under the given constraints.
    ///
    /// Filters to active keys matching the model (or tier tag), drops
    /// excluded and cooling-down keys, then walks the candidates in
    /// capacity-weighted random order attempting an atomic reservation. The
    /// first granted reservation wins and its secret is fetched.
    pub async fn select_key(&self, request: &SelectionRequest) -> Result<SelectedKey, RouterError> {
        let now = Utc::now();
        let catalog = self.catalog.read().await;
        let health = self.health.read().await;

        let usable = |key: &&ApiKeyMetadata| {
            key.active
                && !request.excluded_keys.contains(&key.key_id)
                && !health
                    .get(&key.key_id)
                    .is_some_and(|h| h.in_cooldown(now))
        };

        let mut candidates: Vec<&ApiKeyMetadata> = match &request.workload_tag {
            Some(tag) => catalog
                .iter()
                .filter(|k| k.workload_tag.as_deref() == Some(tag.as_str()))
                .filter(usable)
                .collect(),
            None => {
                let exact: Vec<&ApiKeyMetadata> = catalog
                    .iter()
                    .filter(|k| k.matches_model(&request.model_preference, false))
                    .filter(usable)
                    .collect();
                if exact.is_empty() && self.model_family_fallback {
                    catalog
                        .iter()
                        .filter(|k| k.matches_model(&request.model_preference, true))
                        .filter(usable)
                        .collect()
                } else {
                    exact
                }
            }
        };

        if candidates.is_empty() {
            return Err(RouterError::AllKeysExhausted {
                model_preference: request.model_preference.clone(),
            });
        }

        // Capacity-weighted random order: keys with more remaining RPM are
        // tried first with higher probability.
        let mut weighted: Vec<(u32, &ApiKeyMetadata)> = Vec::with_capacity(candidates.len());
        for key in candidates.drain(..) {
            let (remaining_rpm, _) =
                self.limiter.remaining(&key.key_id, key.rpm, key.tpm).await;
            weighted.push((remaining_rpm, key));
        }
        let ordered = weighted_order(weighted);

        drop(health);
        drop(catalog);

        for key in ordered {
            let outcome = self
                .limiter
                .try_reserve(
                    &key.key_id,
                    request.expected_completion_tokens,
                    key.rpm,
                    key.tpm,
                )
                .await;
            if !outcome.is_granted() {
                debug!(key_id = %key.key_id, "reservation denied, trying next key");
                continue;
            }

            let secret = self
                .secrets
                .fetch(&key.key_id)
                .await
                .map_err(|e| RouterError::Secret(e.to_string()))?;

            return Ok(SelectedKey {
                key_id: key.key_id,
                secret,
                model_name: key.model_name,
                workload_tag: key.workload_tag,
            });
        }

        Err(RouterError::AllKeysExhausted {
            model_preference: request.model_preference.clone(),
        })
    }

    /// Record a successful call for a key.
    pub async fn report_success(&self, key_id: &str) {
        let mut health = self.health.write().await;
        health.entry(key_id.to_string()).or_default().record_success(Utc::now());
    }

    /// Record a failed call: enters exponential cooldown.
    pub async fn report_error(&self, key_id: &str, reason: &str) {
        let mut health = self.health.write().await;
        let entry = health.entry(key_id.to_string()).or_default();
        entry.record_error(Utc::now());
        warn!(
            key_id,
            reason,
            consecutive_errors = entry.consecutive_errors,
            cooldown_until = ?entry.cooldown_until,
            "key marked unhealthy"
        );
    }

    /// Per-key health snapshot.
    pub async fn get_health_status(&self) -> HashMap<String, KeyHealthStatus> {
        let now = Utc::now();
        let catalog = self.catalog.read().await;
        let health = self.health.read().await;
        catalog
            .iter()
            .map(|key| {
                let h = health.get(&key.key_id).cloned().unwrap_or_default();
                (
                    key.key_id.clone(),
                    KeyHealthStatus {
                        active: key.active,
                        last_used: h.last_used,
                        success_count: h.success_count,
                        error_count: h.error_count,
                        cooldown_until: h.cooldown_until,
                        in_cooldown: h.in_cooldown(now),
                    },
                )
            })
            .collect()
    }

    /// Raw health for one key (tests and diagnostics).
    pub async fn health_of(&self, key_id: &str) -> KeyHealth {
        self.health.read().await.get(key_id).cloned().unwrap_or_default()
    }

    /// Count of keys usable right now (active and not cooling down).
    pub async fn usable_key_count(&self) -> usize {
        let now = Utc::now();
        let catalog = self.catalog.read().await;
        let health = self.health.read().await;
        catalog
            .iter()
            .filter(|k| k.active && !health.get(&k.key_id).is_some_and(|h| h.in_cooldown(now)))
            .count()
    }
}

/// Order candidates by repeated weighted sampling without replacement.
/// Weight is remaining RPM + 1 so a drained key still gets a last-resort
/// position rather than vanishing.
fn weighted_order(mut weighted: Vec<(u32, &ApiKeyMetadata)>) -> Vec<ApiKeyMetadata> {
    let mut rng = rand::thread_rng();
    let mut ordered = Vec::with_capacity(weighted.len());
    while !weighted.is_empty() {
        let total: u64 = weighted.iter().map(|(w, _)| u64::from(*w) + 1).sum();
        let mut pick = rng.gen_range(0..total);
        let mut index = 0;
        for (i, (w, _)) in weighted.iter().enumerate() {
            let w = u64::from(*w) + 1;
            if pick < w {
                index = i;
                break;
            }
            pick -= w;
        }
        let (_, key) = weighted.swap_remove(index);
        ordered.push(key.clone());
    }
    ordered
}
