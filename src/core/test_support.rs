use crate::core::classifier::RawError;
use crate::domain::ports::{EsimTransport, RawResponse, Sleeper};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted transport: pops one canned reply per call and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<std::result::Result<RawResponse, RawError>>>,
    pub(crate) requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn push(&self, reply: std::result::Result<RawResponse, RawError>) {
        self.replies.lock().await.push_back(reply);
    }

    pub(crate) async fn push_json(&self, status: u16, body: Value) {
        self.push(Ok(RawResponse::new(status, body.to_string()))).await;
    }

    pub(crate) async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub(crate) async fn request(&self, index: usize) -> String {
        self.requests.lock().await[index].clone()
    }

    async fn next(&self, line: String) -> std::result::Result<RawResponse, RawError> {
        self.requests.lock().await.push(line);
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(RawError::network("no scripted reply left")))
    }
}

#[async_trait]
impl EsimTransport for ScriptedTransport {
    async fn get(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> std::result::Result<RawResponse, RawError> {
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut line = format!("GET /{}", segments.join("/"));
        if !query.is_empty() {
            line.push('?');
            line.push_str(&query.join("&"));
        }
        self.next(line).await
    }

    async fn post_json(
        &self,
        segments: &[&str],
        body: &Value,
    ) -> std::result::Result<RawResponse, RawError> {
        self.next(format!("POST /{} {}", segments.join("/"), body)).await
    }
}

/// Records requested waits instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    waits: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub(crate) fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}
