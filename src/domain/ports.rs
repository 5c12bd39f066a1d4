use crate::core::classifier::RawError;
use async_trait::async_trait;
use std::time::Duration;

/// Status and body of an HTTP exchange, before any envelope handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The remote bundle/order/provisioning API.
///
/// Paths are given as unencoded segments; implementations handle escaping.
/// Only failures that produced no HTTP response at all are returned as `Err`.
#[async_trait]
pub trait EsimTransport: Send + Sync {
    async fn get(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> std::result::Result<RawResponse, RawError>;

    async fn post_json(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> std::result::Result<RawResponse, RawError>;
}

/// Injectable clock for backoff waits.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
