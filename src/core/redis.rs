use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

const WINDOW_SCRIPT: &str = r#"
    local current = redis.call("INCR", KEYS[1])
    if current == 1 then
        redis.call("EXPIRE", KEYS[1], ARGV[1])
    end
    return current
"#;

/// Fixed-window limit applied per subject (username, IP, ...).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimit {
    pub(crate) scope: &'static str,
    pub(crate) max_hits: u64,
    pub(crate) window_seconds: u64,
}

impl RateLimit {
    pub(crate) fn key(&self, subject: &str) -> String {
        format!("rl:{}:{}", self.scope, subject.trim().to_ascii_lowercase())
    }
}

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        *self.manager.write().await = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        *self.manager.write().await = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Count a hit for `subject` and report whether it is still within the limit.
    /// Without a connection every hit is allowed.
    pub(crate) async fn allow(&self, limit: RateLimit, subject: &str) -> Result<bool, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(true);
        };

        let current: i64 = redis::Script::new(WINDOW_SCRIPT)
            .key(limit.key(subject))
            .arg(limit.window_seconds as i64)
            .invoke_async(&mut manager)
            .await?;

        Ok(current <= limit.max_hits as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimit, RedisHandle};

    const LOGIN: RateLimit = RateLimit { scope: "login", max_hits: 1, window_seconds: 5 };

    #[test]
    fn key_is_scoped_and_normalised() {
        assert_eq!(LOGIN.key(" Alice "), "rl:login:alice");
    }

    #[tokio::test]
    async fn disconnected_handle_allows_everything() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());
        assert!(redis.allow(LOGIN, "alice").await.expect("allow"));
        assert!(redis.allow(LOGIN, "alice").await.expect("allow"));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn connected_handle_enforces_limit() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());
        redis.connect().await.expect("redis connect");

        let subject = uuid::Uuid::new_v4().to_string();
        assert!(redis.allow(LOGIN, &subject).await.expect("first hit"));
        assert!(!redis.allow(LOGIN, &subject).await.expect("second hit"));
    }
}
