use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::OnceCell;

use crate::{
    config::{LimiterConfig, StoreConfig},
    error::{LimiterError, LimiterResult, TooManyRequests},
    ratelimit::{
        BackendKind, Category, CounterAdapter, Decision,
        distributed::{Clock, CounterStore, DistributedCounter, SystemClock},
        in_memory::LocalCounter,
        quota::QuotaRegistry,
        redis_backend::RedisStore,
        rest_backend::RestStore,
    },
};

enum Backend {
    Distributed {
        settings: Option<StoreConfig>,
        store: OnceCell<Arc<dyn CounterStore>>,
    },
    Local,
}

#[derive(Debug, Default)]
struct AdmissionStats {
    admitted_total: AtomicU64,
    quota_exceeded_total: AtomicU64,
    backend_failure_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionSnapshot {
    pub admitted_total: u64,
    pub quota_exceeded_total: u64,
    pub backend_failure_total: u64,
}

/// Entry point for admission control. The backend is chosen once, when the
/// service is built, and applies to every category for its whole lifetime.
pub struct AdmissionService {
    backend: Backend,
    quotas: QuotaRegistry,
    key_prefix: String,
    store_timeout: Duration,
    fail_open_on_error: bool,
    clock: Arc<dyn Clock>,
    adapters: [OnceCell<Arc<dyn CounterAdapter>>; 3],
    stats: AdmissionStats,
}

impl AdmissionService {
    pub fn new(config: LimiterConfig) -> Self {
        let backend = match config.store.clone() {
            Some(settings) => Backend::Distributed {
                settings: Some(settings),
                store: OnceCell::new(),
            },
            None => Backend::Local,
        };
        Self::build(config, backend)
    }

    /// Distributed service over an already constructed store client.
    pub fn with_store(config: LimiterConfig, store: Arc<dyn CounterStore>) -> Self {
        let backend = Backend::Distributed {
            settings: None,
            store: OnceCell::new_with(Some(store)),
        };
        Self::build(config, backend)
    }

    fn build(config: LimiterConfig, backend: Backend) -> Self {
        let service = Self {
            backend,
            quotas: config.quotas,
            key_prefix: config.key_prefix,
            store_timeout: config.store_timeout,
            fail_open_on_error: config.fail_open_on_error,
            clock: Arc::new(SystemClock),
            adapters: std::array::from_fn(|_| OnceCell::new()),
            stats: AdmissionStats::default(),
        };

        tracing::info!(
            backend = %service.backend_kind(),
            fail_open = service.fail_open_on_error,
            "rate limiter backend selected"
        );
        service
    }

    /// Replaces the wall clock used by distributed adapters built after this call.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Backend::Distributed { .. } => BackendKind::Distributed,
            Backend::Local => BackendKind::Local,
        }
    }

    pub fn stats(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            admitted_total: self.stats.admitted_total.load(Ordering::Relaxed),
            quota_exceeded_total: self.stats.quota_exceeded_total.load(Ordering::Relaxed),
            backend_failure_total: self.stats.backend_failure_total.load(Ordering::Relaxed),
        }
    }

    /// Admits the call or fails with the one caller-facing rejection.
    pub async fn check(&self, identifier: &str, category: Category) -> Result<(), TooManyRequests> {
        match self.decide(identifier, category).await {
            Ok(decision) if decision.admitted => {
                self.stats.admitted_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(decision) => {
                self.stats
                    .quota_exceeded_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    %category,
                    identifier,
                    retry_after_secs = ?decision.retry_after_secs,
                    cause = "quota_exceeded",
                    "request rejected by rate limiter"
                );
                Err(TooManyRequests::quota_exceeded(decision.retry_after_secs))
            }
            Err(err) => {
                self.stats
                    .backend_failure_total
                    .fetch_add(1, Ordering::Relaxed);
                if self.fail_open_on_error {
                    tracing::warn!(
                        %category,
                        identifier,
                        cause = "backend_failure",
                        error = %err,
                        "rate limiter backend failed; admitting request because fail-open is enabled"
                    );
                    Ok(())
                } else {
                    tracing::error!(
                        %category,
                        identifier,
                        cause = "backend_failure",
                        error = %err,
                        "rate limiter backend failed; rejecting request"
                    );
                    Err(TooManyRequests::backend_failure(&err))
                }
            }
        }
    }

    /// Raw decision from the active backend, without normalization.
    pub async fn decide(&self, identifier: &str, category: Category) -> LimiterResult<Decision> {
        self.adapter(category).await?.admit(identifier).await
    }

    pub(crate) async fn adapter(&self, category: Category) -> LimiterResult<Arc<dyn CounterAdapter>> {
        self.adapters[category.index()]
            .get_or_try_init(|| self.build_adapter(category))
            .await
            .cloned()
    }

    async fn build_adapter(&self, category: Category) -> LimiterResult<Arc<dyn CounterAdapter>> {
        let profile = self.quotas.profile_for(category);
        tracing::debug!(
            %category,
            backend = %self.backend_kind(),
            limit = profile.limit(),
            window_secs = profile.window().as_secs(),
            "constructing rate limit adapter"
        );

        match &self.backend {
            Backend::Local => Ok(Arc::new(LocalCounter::new(category, profile))),
            Backend::Distributed { settings, store } => {
                let store = store
                    .get_or_try_init(|| connect_store(settings.as_ref(), self.store_timeout))
                    .await?
                    .clone();
                Ok(Arc::new(DistributedCounter::new(
                    store,
                    self.clock.clone(),
                    category,
                    profile,
                    self.key_prefix.clone(),
                    self.store_timeout,
                )))
            }
        }
    }
}

async fn connect_store(
    settings: Option<&StoreConfig>,
    timeout: Duration,
) -> LimiterResult<Arc<dyn CounterStore>> {
    let settings = settings
        .ok_or_else(|| LimiterError::Config("no shared store configured".to_string()))?;
    let scheme = settings
        .url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();

    match scheme.as_str() {
        "http" | "https" => Ok(Arc::new(RestStore::new(
            &settings.url,
            &settings.token,
            timeout,
        )?)),
        "redis" | "rediss" => {
            let connect = RedisStore::connect(&settings.url, &settings.token);
            let store = tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| LimiterError::Timeout(timeout))??;
            Ok(Arc::new(store))
        }
        _ => Err(LimiterError::Config(format!(
            "unsupported shared store url scheme: {scheme:?}"
        ))),
    }
}
