use crate::core::catalog::CatalogClient;
use crate::core::install_url::synthesize;
use crate::core::order::OrderSubmitter;
use crate::core::poller::{CancellationToken, PollOutcome, ProvisioningPoller};
use crate::core::verifier::BundleVerifier;
use crate::domain::model::{
    CheckoutOutcome, CheckoutProgress, CheckoutReceipt, CheckoutStep, OrderRequest, PollOptions,
};
use crate::domain::ports::{EsimTransport, Sleeper};
use crate::utils::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutOptions {
    pub poll: PollOptions,
    pub allow_reassign: bool,
}

/// Drives one checkout: verify bundle, submit order, poll for the profile.
///
/// Runs strictly sequentially. The caller must not start a second checkout for
/// the same selection while one is in flight; each run creates a billable order.
pub struct CheckoutEngine<T: EsimTransport, S: Sleeper> {
    catalog: CatalogClient<T>,
    verifier: BundleVerifier<T>,
    submitter: OrderSubmitter<T>,
    poller: ProvisioningPoller<T, S>,
    options: CheckoutOptions,
    progress: Option<mpsc::UnboundedSender<CheckoutProgress>>,
}

impl<T: EsimTransport, S: Sleeper> CheckoutEngine<T, S> {
    pub fn new(transport: Arc<T>, sleeper: Arc<S>, options: CheckoutOptions) -> Self {
        Self {
            catalog: CatalogClient::new(transport.clone()),
            verifier: BundleVerifier::new(transport.clone()),
            submitter: OrderSubmitter::new(transport.clone()),
            poller: ProvisioningPoller::new(transport, sleeper),
            options,
            progress: None,
        }
    }

    /// Streams read-only progress events to `progress`.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<CheckoutProgress>) -> Self {
        self.poller = self.poller.with_progress(progress.clone());
        self.progress = Some(progress);
        self
    }

    pub fn catalog(&self) -> &CatalogClient<T> {
        &self.catalog
    }

    pub fn verifier(&self) -> &BundleVerifier<T> {
        &self.verifier
    }

    pub fn options(&self) -> &CheckoutOptions {
        &self.options
    }

    fn emit(&self, step: CheckoutStep) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(CheckoutProgress::now(step));
        }
    }

    fn cancelled(&self, bundle_identifier: &str) -> Result<CheckoutOutcome> {
        tracing::info!("🛑 Checkout for '{}' cancelled", bundle_identifier);
        self.emit(CheckoutStep::Cancelled);
        Ok(CheckoutOutcome::Cancelled)
    }

    pub async fn start_checkout(
        &self,
        bundle_identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<CheckoutOutcome> {
        tracing::info!("🚀 Starting checkout for '{}'", bundle_identifier);
        if cancel.is_cancelled() {
            return self.cancelled(bundle_identifier);
        }

        // 1. 驗證 bundle
        self.emit(CheckoutStep::Verifying {
            bundle_identifier: bundle_identifier.to_string(),
        });
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.cancelled(bundle_identifier),
            plan = self.verifier.verify(bundle_identifier) => plan?,
        };
        self.emit(CheckoutStep::Verified { plan: plan.clone() });

        // 2. 下單：送出後不可中途取消，否則會遺失已成立的訂單編號
        if cancel.is_cancelled() {
            return self.cancelled(bundle_identifier);
        }
        self.emit(CheckoutStep::Submitting {
            bundle_identifier: plan.bundle_identifier.clone(),
        });
        let request = OrderRequest::single(plan.bundle_identifier.clone(), self.options.allow_reassign);
        let order = self.submitter.submit(&request).await?;
        self.emit(CheckoutStep::Submitted {
            order_reference: order.order_reference.clone(),
        });

        // 3. 輪詢 QR code
        let (mut profile, attempts) = match self
            .poller
            .poll_for_profile(&order.order_reference, &self.options.poll, cancel)
            .await?
        {
            PollOutcome::Ready { profile, attempts } => (profile, attempts),
            PollOutcome::Cancelled => return Ok(CheckoutOutcome::Cancelled),
        };

        if let Some(identifier) = order.esim_identifiers.first() {
            profile.backfill(identifier);
        }
        let install_url = synthesize(&profile);
        if install_url.is_none() && profile.qr_code_payload.is_some() {
            tracing::debug!(
                "QR payload for {} is not an install link, manual entry needed",
                order.order_reference
            );
        }

        tracing::info!(
            "✅ Checkout for '{}' completed: order {} in {} attempt(s)",
            plan.bundle_identifier,
            order.order_reference,
            attempts
        );

        Ok(CheckoutOutcome::Completed(CheckoutReceipt {
            plan,
            order,
            profile,
            install_url,
            attempts,
        }))
    }
}
