use std::time::Duration;

use async_trait::async_trait;
use redis::{IntoConnectionInfo, aio::ConnectionManager};

use crate::{
    error::LimiterResult,
    ratelimit::distributed::{CounterStore, WindowCounts},
};

/// Native-protocol store client. The access token is sent as the connection password.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str, token: &str) -> LimiterResult<Self> {
        let mut info = url.into_connection_info()?;
        info.redis.password = Some(token.to_string());
        let client = redis::Client::open(info)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_window(
        &self,
        previous_key: &str,
        current_key: &str,
        ttl: Duration,
    ) -> LimiterResult<WindowCounts> {
        let mut conn = self.manager.clone();
        let ttl_ms = ttl.as_millis().max(1) as i64;

        let (previous, current): (Option<u64>, u64) = redis::pipe()
            .atomic()
            .get(previous_key)
            .incr(current_key, 1)
            .cmd("PEXPIRE")
            .arg(current_key)
            .arg(ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(WindowCounts {
            previous: previous.unwrap_or(0),
            current,
        })
    }
}
