use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{LimiterError, LimiterResult},
    ratelimit::distributed::{CounterStore, WindowCounts},
};

/// Key-value store reached over HTTP, authenticated with a bearer token.
/// Commands are sent as one `multi-exec` transaction per call.
pub struct RestStore {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

impl RestStore {
    pub fn new(url: &str, token: &str, timeout: Duration) -> LimiterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/multi-exec", url.trim_end_matches('/')),
            token: token.to_string(),
        })
    }
}

fn parse_replies(body: &str) -> LimiterResult<WindowCounts> {
    let replies: Vec<CommandReply> = serde_json::from_str(body)
        .map_err(|e| LimiterError::Malformed(format!("{e}: {body}")))?;

    if let Some(err) = replies.iter().find_map(|r| r.error.as_deref()) {
        return Err(LimiterError::Store(err.to_string()));
    }

    match replies.as_slice() {
        [previous, current, _expire] => Ok(WindowCounts {
            previous: parse_count(&previous.result)?,
            current: parse_count(&current.result)?,
        }),
        _ => Err(LimiterError::Malformed(format!(
            "expected 3 replies, got {}",
            replies.len()
        ))),
    }
}

fn parse_count(value: &Value) -> LimiterResult<u64> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| LimiterError::Malformed(format!("invalid counter value: {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| LimiterError::Malformed(format!("invalid counter value: {s}"))),
        other => Err(LimiterError::Malformed(format!(
            "invalid counter value: {other}"
        ))),
    }
}

#[async_trait]
impl CounterStore for RestStore {
    async fn increment_window(
        &self,
        previous_key: &str,
        current_key: &str,
        ttl: Duration,
    ) -> LimiterResult<WindowCounts> {
        let ttl_ms = ttl.as_millis().max(1).to_string();
        let commands = json!([
            ["GET", previous_key],
            ["INCR", current_key],
            ["PEXPIRE", current_key, ttl_ms],
        ]);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LimiterError::Store(format!("status {status}: {body}")));
        }

        parse_replies(&body)
    }
}
