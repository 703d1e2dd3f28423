use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;

use crate::{
    error::{LimiterError, LimiterResult},
    ratelimit::{BackendKind, Category, CounterAdapter, Decision, quota::QuotaProfile},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounts {
    pub previous: u64,
    pub current: u64,
}

/// Shared key-value store with atomic increment-with-TTL semantics.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// In one atomic round trip: read `previous_key`, increment `current_key`
    /// and set its expiry to `ttl`. Missing keys count as zero.
    async fn increment_window(
        &self,
        previous_key: &str,
        current_key: &str,
        ttl: Duration,
    ) -> LimiterResult<WindowCounts>;
}

/// Wall clock shared by every instance talking to the same store.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> LimiterResult<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> LimiterResult<u64> {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| LimiterError::Internal(e.to_string()))?;
        Ok(duration.as_millis() as u64)
    }
}

/// Sliding window counter backed by a [`CounterStore`].
///
/// Windows are aligned to multiples of the quota window. The estimate is
/// `previous * (remaining / window) + current`, so a full previous window
/// still weighs almost entirely at the start of the next one and the edge
/// cannot admit a double burst. Denied calls are counted too, and the retry
/// hint is the wait until a single further call fits under the limit.
pub struct DistributedCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    category: Category,
    profile: QuotaProfile,
    key_prefix: String,
    timeout: Duration,
}

impl DistributedCounter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        category: Category,
        profile: QuotaProfile,
        key_prefix: String,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            category,
            profile,
            key_prefix,
            timeout,
        }
    }

    fn key(&self, identifier: &str, window_index: u64) -> String {
        format!(
            "{}:{}:{}:{}",
            self.key_prefix, self.category, identifier, window_index
        )
    }

    async fn admit_at(&self, identifier: &str, now_ms: u64) -> LimiterResult<Decision> {
        let window_ms = self.profile.window().as_millis().max(1) as u64;
        let window_index = now_ms / window_ms;
        let elapsed_ms = now_ms - window_index * window_ms;

        let previous_key = self.key(identifier, window_index.saturating_sub(1));
        let current_key = self.key(identifier, window_index);
        let ttl = self.profile.window() * 2;

        let counts = tokio::time::timeout(
            self.timeout,
            self.store
                .increment_window(&previous_key, &current_key, ttl),
        )
        .await
        .map_err(|_| LimiterError::Timeout(self.timeout))??;

        if counts.current == 0 {
            return Err(LimiterError::Malformed(
                "increment returned a zero count".to_string(),
            ));
        }

        // Window 0 has no predecessor; its "previous" key aliases itself.
        let previous = if window_index == 0 { 0 } else { counts.previous };
        let limit = u64::from(self.profile.limit());

        // previous * (remaining / window) + current <= limit, scaled by window.
        let estimate = u128::from(previous) * u128::from(window_ms - elapsed_ms)
            + u128::from(counts.current) * u128::from(window_ms);
        if estimate <= u128::from(limit) * u128::from(window_ms) {
            return Ok(Decision::admit());
        }

        let wait_ms = retry_after_ms(previous, counts.current, limit, elapsed_ms, window_ms);
        Ok(Decision::deny(Some(wait_ms.div_ceil(1_000).max(1))))
    }
}

/// Milliseconds until one more call would be admitted, given the counts that
/// include the call just denied.
fn retry_after_ms(
    previous: u64,
    current: u64,
    limit: u64,
    elapsed_ms: u64,
    window_ms: u64,
) -> u64 {
    let scaled = |count: u64, budget: u64| {
        (u128::from(budget) * u128::from(window_ms) / u128::from(count.max(1))) as u64
    };

    // Still inside this window the retry adds one to `current`, so the
    // previous window's share has to decay to `limit - current - 1`.
    if current < limit && previous > 0 {
        let remaining_allowed = scaled(previous, limit - current - 1).min(window_ms);
        let target = window_ms - remaining_allowed;
        if target < window_ms {
            return target.saturating_sub(elapsed_ms);
        }
    }

    // Otherwise this window becomes the previous one and the retry is the
    // first call of the next window.
    let remaining_allowed = scaled(current, limit.saturating_sub(1)).min(window_ms);
    (window_ms - elapsed_ms) + (window_ms - remaining_allowed)
}

#[async_trait]
impl CounterAdapter for DistributedCounter {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    async fn admit(&self, identifier: &str) -> LimiterResult<Decision> {
        let now_ms = self.clock.now_ms()?;
        self.admit_at(identifier, now_ms).await
    }
}
