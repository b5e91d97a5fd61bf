use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;

use crate::aggregate::ResultsMaintainer;
use crate::catalog::Catalogs;
use crate::config::{CacheConfig, WebhookConfig};
use crate::ingest::VotePipeline;
use crate::models::vote::PendingDemographic;
use crate::store::VoteStore;

#[derive(Clone)]
pub struct AppState {
    pub store: VoteStore,
    pub results: Arc<ResultsMaintainer>,
    pub correlation: Arc<CorrelationCache>,
    pub catalogs: Arc<Catalogs>,
    pub pipeline: Arc<VotePipeline>,
    pub webhook: Arc<WebhookConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<VotePipeline>, webhook: WebhookConfig) -> Self {
        Self {
            store: pipeline.store().clone(),
            results: Arc::clone(pipeline.results()),
            correlation: Arc::clone(pipeline.correlation()),
            catalogs: Arc::clone(pipeline.catalogs()),
            pipeline,
            webhook: Arc::new(webhook),
            start_time: Instant::now(),
        }
    }
}

/// Short-lived pre-vote registrations keyed by the exact SMS text the voter
/// will send. Lookups never remove the entry; it lives until the TTL lapses.
pub struct CorrelationCache {
    pending: Cache<String, PendingDemographic>,
    ttl: Duration,
}

impl CorrelationCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.prevote_max_capacity >= 100,
            "Pre-vote cache capacity threshold"
        );

        let ttl = config.prevote_ttl();
        let pending = Cache::builder()
            .max_capacity(config.prevote_max_capacity)
            .time_to_live(ttl)
            .build();

        Self { pending, ttl }
    }

    pub async fn register(&self, key: String, data: PendingDemographic) {
        assert!(!key.is_empty(), "Correlation key cannot be empty");
        self.pending.insert(key, data).await;
    }

    pub async fn consume(&self, key: &str) -> Option<PendingDemographic> {
        self.pending.get(key).await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.pending.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_seconds: u64) -> CorrelationCache {
        CorrelationCache::new(&CacheConfig {
            prevote_ttl_seconds: ttl_seconds,
            prevote_max_capacity: 100,
        })
    }

    fn demographic() -> PendingDemographic {
        PendingDemographic {
            postcode: "SW16".to_string(),
            birth_year: 1980,
        }
    }

    #[tokio::test]
    async fn consume_does_not_remove_entry() {
        let cache = cache(300);
        cache.register("q2YORAB".to_string(), demographic()).await;

        assert_eq!(cache.consume("q2YORAB").await, Some(demographic()));
        assert_eq!(cache.consume("q2YORAB").await, Some(demographic()));
    }

    #[tokio::test]
    async fn unknown_key_is_absent() {
        let cache = cache(300);
        cache.register("q2YORAB".to_string(), demographic()).await;
        assert_eq!(cache.consume("q2YORAC").await, None);
        assert_eq!(cache.consume("").await, None);
    }

    #[tokio::test]
    async fn unconsumed_entry_expires_after_ttl() {
        let cache = cache(1);
        cache.register("q2YORAB".to_string(), demographic()).await;
        assert_eq!(cache.consume("q2YORAB").await, Some(demographic()));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cache.consume("q2YORAB").await, None);
    }

    #[tokio::test]
    async fn reregistering_replaces_data() {
        let cache = cache(300);
        cache.register("k1abc".to_string(), demographic()).await;
        let updated = PendingDemographic {
            postcode: "E1".to_string(),
            birth_year: 1990,
        };
        cache.register("k1abc".to_string(), updated.clone()).await;
        assert_eq!(cache.consume("k1abc").await, Some(updated));
    }
}
