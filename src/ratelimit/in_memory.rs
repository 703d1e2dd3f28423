use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{
    error::LimiterResult,
    ratelimit::{BackendKind, Category, CounterAdapter, Decision, quota::QuotaProfile},
};

const PRUNE_EVERY: u64 = 256;

/// In-process point budget per identifier, for deployments without a shared store.
///
/// Fixed-window semantics: the first consumption opens a cycle. Points come
/// back one window after that, or one block duration after it once the budget
/// is used up. Denied calls consume nothing and never move the deadline. A
/// burst of up to twice the limit is possible across a cycle boundary.
pub struct LocalCounter {
    category: Category,
    profile: QuotaProfile,
    points: DashMap<String, PointState>,
    calls: AtomicU64,
}

#[derive(Debug)]
struct PointState {
    consumed: u32,
    cycle_started_at: Instant,
}

impl PointState {
    fn fresh(now: Instant) -> Self {
        Self {
            consumed: 0,
            cycle_started_at: now,
        }
    }

    fn regenerates_at(&self, profile: &QuotaProfile) -> Instant {
        let span = if self.consumed >= profile.limit() {
            profile.window().max(profile.block_duration())
        } else {
            profile.window()
        };
        self.cycle_started_at + span
    }

    fn is_expired(&self, now: Instant, profile: &QuotaProfile) -> bool {
        now >= self.regenerates_at(profile)
    }

    fn consume(&mut self, now: Instant, profile: &QuotaProfile) -> bool {
        if self.is_expired(now, profile) {
            *self = Self::fresh(now);
        }

        if self.consumed >= profile.limit() {
            return false;
        }
        self.consumed += 1;
        true
    }
}

impl LocalCounter {
    pub fn new(category: Category, profile: QuotaProfile) -> Self {
        Self {
            category,
            profile,
            points: DashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    fn prune(&self, now: Instant) {
        let before = self.points.len();
        self.points
            .retain(|_, state| !state.is_expired(now, &self.profile));
        let pruned = before.saturating_sub(self.points.len());
        if pruned > 0 {
            tracing::debug!(
                category = %self.category,
                pruned,
                "pruned expired local rate limit entries"
            );
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.points.len()
    }
}

#[async_trait]
impl CounterAdapter for LocalCounter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn admit(&self, identifier: &str) -> LimiterResult<Decision> {
        let now = Instant::now();
        if self.calls.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        // The entry guard holds the shard lock, so consume is atomic per identifier.
        let admitted = self
            .points
            .entry(identifier.to_string())
            .or_insert_with(|| PointState::fresh(now))
            .consume(now, &self.profile);

        if admitted {
            Ok(Decision::admit())
        } else {
            Ok(Decision::deny(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn contact_counter() -> LocalCounter {
        let hour = Duration::from_secs(3600);
        LocalCounter::new(
            Category::Contact,
            QuotaProfile::new(3, hour, hour).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn denies_the_call_after_the_limit_then_recovers() {
        let counter = contact_counter();

        for _ in 0..3 {
            assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
        }
        let denied = counter.admit("1.2.3.4").await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.retry_after_secs, None);

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(!counter.admit("1.2.3.4").await.unwrap().admitted);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn late_over_limit_call_recovers_at_the_cycle_deadline() {
        let counter = contact_counter();
        for _ in 0..3 {
            assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
        }

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(!counter.admit("1.2.3.4").await.unwrap().admitted);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn block_longer_than_the_window_holds_an_exhausted_budget() {
        let counter = LocalCounter::new(
            Category::Core,
            QuotaProfile::new(2, Duration::from_secs(60), Duration::from_secs(300)).unwrap(),
        );
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!counter.admit("1.2.3.4").await.unwrap().admitted);

        tokio::time::advance(Duration::from_secs(180)).await;
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);

        // An unexhausted budget still resets after one window.
        assert!(counter.admit("5.6.7.8").await.unwrap().admitted);
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..2 {
            assert!(counter.admit("5.6.7.8").await.unwrap().admitted);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_calls_do_not_extend_the_block() {
        let counter = contact_counter();
        for _ in 0..4 {
            counter.admit("1.2.3.4").await.unwrap();
        }

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(300)).await;
            assert!(!counter.admit("1.2.3.4").await.unwrap().admitted);
        }

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_resets_without_a_block() {
        let counter = contact_counter();
        for _ in 0..3 {
            assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..3 {
            assert!(counter.admit("1.2.3.4").await.unwrap().admitted);
        }
        assert!(!counter.admit("1.2.3.4").await.unwrap().admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn identifiers_are_isolated() {
        let counter = contact_counter();
        for _ in 0..4 {
            counter.admit("10.0.0.1").await.unwrap();
        }
        assert!(!counter.admit("10.0.0.1").await.unwrap().admitted);
        assert!(counter.admit("10.0.0.2").await.unwrap().admitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_burst_from_one_identifier_cannot_bypass_the_limit() {
        let counter = Arc::new(contact_counter());

        let handles = (0..64)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.admit("1.2.3.4").await.unwrap().admitted })
            })
            .collect::<Vec<_>>();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn prunes_expired_entries_lazily() {
        let counter = contact_counter();
        for i in 0..10 {
            counter.admit(&format!("10.0.0.{i}")).await.unwrap();
        }
        assert_eq!(counter.tracked(), 10);

        tokio::time::advance(Duration::from_secs(3601)).await;
        for _ in 10..PRUNE_EVERY {
            counter.admit("10.0.1.1").await.unwrap();
        }
        assert_eq!(counter.tracked(), 1);
    }
}
