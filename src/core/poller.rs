use crate::core::classifier::classify;
use crate::core::response::{normalize_response, string_field};
use crate::domain::model::{CheckoutProgress, CheckoutStep, PollOptions, ProfileReadiness, ProvisioningProfile};
use crate::domain::ports::{EsimTransport, Sleeper};
use crate::utils::error::{ClassifiedError, ErrorCategory, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Cloneable cancellation signal shared between the caller and a running checkout.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Poll loop states; `Ready` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    NotRequested,
    Waiting { attempt: u32 },
    Attempting { attempt: u32 },
    Ready { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// How a poll run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready {
        profile: ProvisioningProfile,
        attempts: u32,
    },
    Cancelled,
}

enum AttemptResult {
    Profile(ProvisioningProfile),
    Failed(ClassifiedError),
}

/// Fetches the installable profile of an order, retrying while it is not ready yet.
pub struct ProvisioningPoller<T: EsimTransport, S: Sleeper> {
    transport: Arc<T>,
    sleeper: Arc<S>,
    progress: Option<mpsc::UnboundedSender<CheckoutProgress>>,
}

impl<T: EsimTransport, S: Sleeper> ProvisioningPoller<T, S> {
    pub fn new(transport: Arc<T>, sleeper: Arc<S>) -> Self {
        Self {
            transport,
            sleeper,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<CheckoutProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, step: CheckoutStep) {
        if let Some(tx) = &self.progress {
            // 接收端已關閉代表 UI 不再關心進度
            let _ = tx.send(CheckoutProgress::now(step));
        }
    }

    /// `false` when cancelled before the delay elapsed.
    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.sleeper.sleep(delay) => true,
        }
    }

    pub async fn poll_for_profile(
        &self,
        order_reference: &str,
        options: &PollOptions,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        let order_reference = order_reference.trim();
        if order_reference.is_empty() {
            return Err(ClassifiedError::validation(
                "provisioning requires an order reference",
            ));
        }
        if options.retries == 0 {
            return Err(ClassifiedError::validation(
                "provisioning requires at least one attempt",
            ));
        }

        let mut state = PollState::NotRequested;
        let mut last_error: Option<ClassifiedError> = None;
        let mut candidate: Option<ProvisioningProfile> = None;

        loop {
            state = match state {
                PollState::NotRequested => {
                    // 訂單剛成立時 profile 不一定存在，先等一段寬限期
                    self.emit(CheckoutStep::Waiting {
                        attempt: 1,
                        delay_ms: options.grace_period.as_millis() as u64,
                    });
                    if !self.wait(options.grace_period, cancel).await {
                        return Ok(self.cancelled(order_reference));
                    }
                    PollState::Attempting { attempt: 1 }
                }
                PollState::Waiting { attempt } => {
                    let delay = options.backoff.delay_after(options.initial_delay, attempt - 1);
                    tracing::debug!(
                        "Waiting {:?} before provisioning attempt {} for {}",
                        delay,
                        attempt,
                        order_reference
                    );
                    self.emit(CheckoutStep::Waiting {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    if !self.wait(delay, cancel).await {
                        return Ok(self.cancelled(order_reference));
                    }
                    PollState::Attempting { attempt }
                }
                PollState::Attempting { attempt: current } => {
                    self.emit(CheckoutStep::Attempting {
                        attempt: current,
                        max_attempts: options.retries,
                    });

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(self.cancelled(order_reference)),
                        result = self.attempt(order_reference) => result,
                    };

                    match result {
                        AttemptResult::Profile(profile)
                            if profile.readiness() == ProfileReadiness::Ready =>
                        {
                            tracing::info!(
                                "📲 Profile for {} ready after {} attempt(s)",
                                order_reference,
                                current
                            );
                            candidate = Some(profile);
                            PollState::Ready { attempts: current }
                        }
                        AttemptResult::Profile(profile) => {
                            tracing::warn!(
                                "⏳ Profile for {} not ready (attempt {}/{})",
                                order_reference,
                                current,
                                options.retries
                            );
                            self.emit(CheckoutStep::NotReady { attempt: current });
                            if profile.readiness() == ProfileReadiness::FallbackOnly {
                                candidate = Some(profile);
                            }
                            last_error = Some(ClassifiedError::transient(format!(
                                "profile for order {} has no QR payload yet",
                                order_reference
                            )));
                            self.next_state(current, options)
                        }
                        AttemptResult::Failed(err)
                            if !err.retryable && err.category != ErrorCategory::NotFound =>
                        {
                            // 不可重試的錯誤直接回報；NotFound 例外，訂單剛成立時 profile 可能尚未建立
                            tracing::warn!(
                                "⚠️ Provisioning attempt {} for {} failed permanently: {}",
                                current,
                                order_reference,
                                err
                            );
                            return Err(err);
                        }
                        AttemptResult::Failed(err) => {
                            tracing::warn!(
                                "⚠️ Provisioning attempt {}/{} for {} failed: {}",
                                current,
                                options.retries,
                                order_reference,
                                err
                            );
                            self.emit(CheckoutStep::NotReady { attempt: current });
                            last_error = Some(err);
                            self.next_state(current, options)
                        }
                    }
                }
                PollState::Ready { attempts } => {
                    self.emit(CheckoutStep::Ready { attempts });
                    return match candidate {
                        Some(profile) => Ok(PollOutcome::Ready { profile, attempts }),
                        None => Err(ClassifiedError::unknown("poller reached ready without a profile")),
                    };
                }
                PollState::Exhausted { attempts } => {
                    self.emit(CheckoutStep::Exhausted { attempts });
                    if let Some(profile) = candidate {
                        tracing::info!(
                            "Profile for {} has no QR payload, returning SM-DP+ details for manual install",
                            order_reference
                        );
                        return Ok(PollOutcome::Ready { profile, attempts });
                    }
                    let mut err = ClassifiedError::transient(format!(
                        "provisioning profile for order {} was still pending after {} attempts",
                        order_reference, attempts
                    ));
                    if let Some(last) = last_error {
                        err = err.with_source(last);
                    }
                    return Err(err);
                }
            };
        }
    }

    fn next_state(&self, attempt: u32, options: &PollOptions) -> PollState {
        if attempt >= options.retries {
            PollState::Exhausted { attempts: attempt }
        } else {
            PollState::Waiting {
                attempt: attempt + 1,
            }
        }
    }

    fn cancelled(&self, order_reference: &str) -> PollOutcome {
        tracing::info!("Polling for {} cancelled", order_reference);
        self.emit(CheckoutStep::Cancelled);
        PollOutcome::Cancelled
    }

    async fn attempt(&self, order_reference: &str) -> AttemptResult {
        let response = match self.transport.get(&["esims", order_reference, "qr"], &[]).await {
            Ok(response) => response,
            Err(raw) => return AttemptResult::Failed(classify(&raw)),
        };
        match normalize_response(&response) {
            Ok(payload) => AttemptResult::Profile(parse_profile(order_reference, &payload)),
            Err(err) => AttemptResult::Failed(err),
        }
    }
}

/// A missing `qrCode` is a normal "not ready yet" answer, not an error.
fn parse_profile(order_reference: &str, payload: &Value) -> ProvisioningProfile {
    // 有些版本回傳陣列，取第一筆
    let record = match payload {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };

    ProvisioningProfile {
        order_reference: order_reference.to_string(),
        qr_code_payload: string_field(record, &["qrCode", "qr_code", "qr"]),
        smdp_address: string_field(record, &["smdpAddress", "smdp_address", "rspUrl"]),
        matching_id: string_field(record, &["matchingId", "matching_id"]),
        iccid: string_field(record, &["iccid"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::RawError;
    use crate::core::test_support::{RecordingSleeper, ScriptedTransport};
    use crate::domain::model::Backoff;
    use serde_json::json;

    fn poller(
        transport: &Arc<ScriptedTransport>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> ProvisioningPoller<ScriptedTransport, RecordingSleeper> {
        ProvisioningPoller::new(transport.clone(), sleeper.clone())
    }

    async fn push_not_ready(transport: &ScriptedTransport) {
        transport.push_json(200, json!({"data": {"iccid": null}})).await;
    }

    #[tokio::test]
    async fn test_ready_on_first_attempt_stops_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        transport
            .push_json(200, json!({"data": {"qrCode": "LPA:1$smdp.example.com$ABC123"}}))
            .await;
        push_not_ready(&transport).await;

        let outcome = poller(&transport, &sleeper)
            .poll_for_profile("ORD-1", &PollOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            PollOutcome::Ready { profile, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(profile.order_reference, "ORD-1");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(transport.calls().await, 1);
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(2000)]);
        assert_eq!(transport.request(0).await, "GET /esims/ORD-1/qr");
    }

    #[tokio::test]
    async fn test_third_attempt_succeeds_with_linear_waits() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        push_not_ready(&transport).await;
        transport
            .push(Err(RawError::network("operation timed out")))
            .await;
        transport
            .push_json(200, json!({"data": {"qrCode": "data:image/png;base64,AAAA"}}))
            .await;

        let options = PollOptions::default();
        let outcome = poller(&transport, &sleeper)
            .poll_for_profile("ORD-2", &options, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, PollOutcome::Ready { attempts: 3, .. }));
        assert_eq!(transport.calls().await, 3);
        // grace + initial*1 + initial*2
        assert_eq!(
            sleeper.waits(),
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert_eq!(sleeper.total(), options.total_wait_budget());
    }

    #[tokio::test]
    async fn test_exhaustion_is_transient_after_exact_retries() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        for _ in 0..5 {
            push_not_ready(&transport).await;
        }

        let options = PollOptions {
            retries: 4,
            ..PollOptions::default()
        };
        let err = poller(&transport, &sleeper)
            .poll_for_profile("ORD-3", &options, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Transient);
        assert!(err.retryable);
        assert!(err.source.is_some());
        assert_eq!(transport.calls().await, 4);
        // 最後一次失敗後不再等待
        assert_eq!(sleeper.waits().len(), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_underlying_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        push_not_ready(&transport).await;
        transport.push_json(404, json!({"message": "eSIM not found"})).await;

        let options = PollOptions {
            retries: 2,
            ..PollOptions::default()
        };
        let err = poller(&transport, &sleeper)
            .poll_for_profile("ORD-4", &options, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Transient);
        let source = err.source.as_deref().unwrap();
        assert_eq!(source.category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_fallback_profile_returned_when_qr_never_arrives() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        for _ in 0..3 {
            transport
                .push_json(
                    200,
                    json!({"data": {"smdpAddress": "smdp.example.com", "matchingId": "ABC123"}}),
                )
                .await;
        }

        let outcome = poller(&transport, &sleeper)
            .poll_for_profile("ORD-5", &PollOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            PollOutcome::Ready { profile, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(profile.readiness(), ProfileReadiness::FallbackOnly);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        transport
            .push_json(400, json!({"message": "invalid order reference"}))
            .await;

        let err = poller(&transport, &sleeper)
            .poll_for_profile("ORD-6", &PollOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(transport.calls().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        for _ in 0..3 {
            transport
                .push_json(500, json!({"message": "Internal Server Error"}))
                .await;
        }

        let err = poller(&transport, &sleeper)
            .poll_for_profile("ORD-11", &PollOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Unknown);
        assert!(!err.retryable);
        assert_eq!(err.status, Some(500));
        assert_eq!(transport.calls().await, 1);
        // 只有寬限期
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(2000)]);
    }

    #[tokio::test]
    async fn test_missing_reference_is_rejected_preflight() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = poller(&transport, &sleeper)
            .poll_for_profile(" ", &PollOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(transport.calls().await, 0);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poller(&transport, &sleeper)
            .poll_for_profile("ORD-7", &PollOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(transport.calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            push_not_ready(&transport).await;
        }
        let cancel = CancellationToken::new();
        let poller = ProvisioningPoller::new(transport.clone(), Arc::new(crate::domain::ports::TokioSleeper));

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                poller
                    .poll_for_profile("ORD-8", &PollOptions::default(), &cancel)
                    .await
            })
        };

        // grace (2s) + first attempt, then cancel inside the 2s backoff
        tokio::time::sleep(Duration::from_millis(3000)).await;
        cancel.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(transport.calls().await, 1);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        push_not_ready(&transport).await;
        transport.push_json(200, json!({"qrCode": "QR"})).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let options = PollOptions {
            backoff: Backoff::Exponential { multiplier: 3 },
            ..PollOptions::default()
        };
        poller(&transport, &sleeper)
            .with_progress(tx)
            .poll_for_profile("ORD-9", &options, &CancellationToken::new())
            .await
            .unwrap();

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            steps.push(event.step);
        }
        assert_eq!(
            steps,
            vec![
                CheckoutStep::Waiting { attempt: 1, delay_ms: 2000 },
                CheckoutStep::Attempting { attempt: 1, max_attempts: 3 },
                CheckoutStep::NotReady { attempt: 1 },
                CheckoutStep::Waiting { attempt: 2, delay_ms: 2000 },
                CheckoutStep::Attempting { attempt: 2, max_attempts: 3 },
                CheckoutStep::Ready { attempts: 2 },
            ]
        );
    }

    #[test]
    fn test_parse_profile_accepts_array_payload() {
        let payload = json!([{"qr_code": "QR", "smdp_address": "smdp.example.com", "matching_id": "M"}]);
        let profile = parse_profile("ORD-10", &payload);
        assert_eq!(profile.qr_code_payload.as_deref(), Some("QR"));
        assert_eq!(profile.smdp_address.as_deref(), Some("smdp.example.com"));
        assert_eq!(profile.matching_id.as_deref(), Some("M"));
    }
}
