//! Parallel / sequential-staggered dispatch plans.
//!
//! Sequential mode starts each adapter at a configured offset within the
//! tick so outbound load is spread and multiple venues don't co-trigger
//! rate-limit penalties at once. Offsets are recomputed whenever the
//! active exchange set changes, since [`compute_offsets`] is called fresh
//! from the current registry on every [`super::LiveScheduler::new`].

use crate::exchanges::Exchange;
use std::sync::Arc;
use std::time::Duration;

/// Default spacing between adapters when no explicit `collection.schedule`
/// is configured, or when its length doesn't match the active registry.
const DEFAULT_STAGGER_SECONDS: u64 = 5;

/// One offset per adapter in `registry` order. If `schedule` has an entry
/// per adapter, those offsets are used verbatim; otherwise a default
/// evenly-spaced stagger is generated so sequential mode still spreads
/// load even with no explicit configuration.
pub fn compute_offsets(registry: &[Arc<dyn Exchange>], schedule: &[u64]) -> Vec<Duration> {
    if schedule.len() == registry.len() {
        return schedule.iter().map(|s| Duration::from_secs(*s)).collect();
    }
    (0..registry.len())
        .map(|i| Duration::from_secs(i as u64 * DEFAULT_STAGGER_SECONDS))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::error::Result;
    use crate::exchanges::AdapterReport;
    use crate::models::{ContractMeta, ContractSnapshot, FundingPoint};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Dummy(&'static str);

    #[async_trait]
    impl Exchange for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }
        fn rate_limiter(&self) -> Arc<crate::rate_limiter::RateLimiter> {
            crate::rate_limiter::RateLimiter::new(&crate::config::RateLimitConfig {
                capacity: 1,
                refill_per_sec: 1.0,
            })
        }
        async fn fetch(&self, _cancel: &CancellationToken) -> (Vec<ContractSnapshot>, AdapterReport) {
            (Vec::new(), AdapterReport::default())
        }
        async fn fetch_historical(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _cancel: &CancellationToken,
        ) -> Result<Vec<FundingPoint>> {
            Ok(Vec::new())
        }
        async fn list_contracts(&self, _cancel: &CancellationToken) -> Result<Vec<ContractMeta>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn explicit_schedule_used_verbatim_when_lengths_match() {
        let registry: Vec<Arc<dyn Exchange>> = vec![Arc::new(Dummy("a")), Arc::new(Dummy("b"))];
        let offsets = compute_offsets(&registry, &[0, 30]);
        assert_eq!(offsets, vec![Duration::from_secs(0), Duration::from_secs(30)]);
    }

    #[test]
    fn mismatched_schedule_falls_back_to_default_stagger() {
        let registry: Vec<Arc<dyn Exchange>> = vec![Arc::new(Dummy("a")), Arc::new(Dummy("b")), Arc::new(Dummy("c"))];
        let offsets = compute_offsets(&registry, &[0]);
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_secs(DEFAULT_STAGGER_SECONDS));
        assert_eq!(offsets[2], Duration::from_secs(DEFAULT_STAGGER_SECONDS * 2));
    }
}
