use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel stored in [`Plan::data_amount_mb`] for unlimited bundles.
pub const UNLIMITED_DATA_MB: i64 = -1;

/// Duration used when the upstream record carries none.
pub const DEFAULT_DURATION_DAYS: u32 = 30;

/// A purchasable data bundle, normalised from one upstream catalogue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    /// Whole megabytes, or [`UNLIMITED_DATA_MB`].
    pub data_amount_mb: i64,
    pub duration_days: u32,
    /// Smallest currency unit (e.g. cents).
    pub price_minor_units: i64,
    /// Opaque upstream key used for verification and ordering.
    pub bundle_identifier: String,
}

impl Plan {
    pub fn is_unlimited(&self) -> bool {
        self.data_amount_mb == UNLIMITED_DATA_MB
    }

    /// 只在 UI 邊界轉換成人類可讀的流量 (1 GB = 1000 MB，跟上游命名一致)
    pub fn data_display(&self) -> String {
        if self.is_unlimited() {
            return "Unlimited".to_string();
        }
        if self.data_amount_mb >= 1000 {
            let gb = self.data_amount_mb as f64 / 1000.0;
            if self.data_amount_mb % 1000 == 0 {
                format!("{} GB", self.data_amount_mb / 1000)
            } else {
                format!("{:.1} GB", gb)
            }
        } else {
            format!("{} MB", self.data_amount_mb)
        }
    }

    pub fn price_display(&self) -> String {
        let sign = if self.price_minor_units < 0 { "-" } else { "" };
        let abs = self.price_minor_units.abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub bundle_identifier: String,
    pub quantity: u32,
    pub allow_reassign: bool,
}

impl OrderRequest {
    /// This flow always buys exactly one unit.
    pub fn single(bundle_identifier: impl Into<String>, allow_reassign: bool) -> Self {
        Self {
            bundle_identifier: bundle_identifier.into(),
            quantity: 1,
            allow_reassign,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsimIdentifier {
    pub matching_id: Option<String>,
    pub iccid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderResult {
    /// Never empty; the key for every provisioning call.
    pub order_reference: String,
    pub esim_identifiers: Vec<EsimIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningProfile {
    pub order_reference: String,
    pub qr_code_payload: Option<String>,
    pub smdp_address: Option<String>,
    pub matching_id: Option<String>,
    pub iccid: Option<String>,
}

/// How far a polled profile is from being installable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileReadiness {
    /// A non-empty QR payload is present.
    Ready,
    /// No QR payload, but SM-DP+ address and matching ID allow a fallback URL.
    FallbackOnly,
    Pending,
}

impl ProvisioningProfile {
    pub fn pending(order_reference: impl Into<String>) -> Self {
        Self {
            order_reference: order_reference.into(),
            qr_code_payload: None,
            smdp_address: None,
            matching_id: None,
            iccid: None,
        }
    }

    pub fn readiness(&self) -> ProfileReadiness {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if present(&self.qr_code_payload) {
            ProfileReadiness::Ready
        } else if present(&self.smdp_address) && present(&self.matching_id) {
            ProfileReadiness::FallbackOnly
        } else {
            ProfileReadiness::Pending
        }
    }

    /// Fills identifiers the provisioning endpoint left out from those the order returned.
    pub fn backfill(&mut self, identifier: &EsimIdentifier) {
        if self.matching_id.is_none() {
            self.matching_id = identifier.matching_id.clone();
        }
        if self.iccid.is_none() {
            self.iccid = identifier.iccid.clone();
        }
    }
}

/// An activation-code install URL; derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallUrl(pub String);

impl InstallUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstallUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "strategy")]
pub enum Backoff {
    /// `initial_delay * attempt`
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    Exponential { multiplier: u32 },
}

impl Backoff {
    pub fn delay_after(&self, initial_delay: Duration, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear => initial_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                let factor = multiplier.saturating_pow(attempt.saturating_sub(1));
                initial_delay.saturating_mul(factor)
            }
        }
    }
}

/// Bounds for the provisioning poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub retries: u32,
    pub initial_delay: Duration,
    pub grace_period: Duration,
    pub backoff: Backoff,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(2000),
            grace_period: Duration::from_millis(2000),
            backoff: Backoff::Linear,
        }
    }
}

impl PollOptions {
    /// Upper bound of time spent sleeping: `grace + Σ delay_after(i)` for i in 1..retries.
    pub fn total_wait_budget(&self) -> Duration {
        (1..self.retries).fold(self.grace_period, |acc, attempt| {
            acc.saturating_add(self.backoff.delay_after(self.initial_delay, attempt))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CheckoutStep {
    Verifying { bundle_identifier: String },
    Verified { plan: Plan },
    Submitting { bundle_identifier: String },
    Submitted { order_reference: String },
    Waiting { attempt: u32, delay_ms: u64 },
    Attempting { attempt: u32, max_attempts: u32 },
    NotReady { attempt: u32 },
    Ready { attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Read-only progress notification for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutProgress {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub step: CheckoutStep,
}

impl CheckoutProgress {
    pub fn now(step: CheckoutStep) -> Self {
        Self {
            at: Utc::now(),
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutReceipt {
    pub plan: Plan,
    pub order: OrderResult,
    pub profile: ProvisioningProfile,
    pub install_url: Option<InstallUrl>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Completed(CheckoutReceipt),
    /// The caller went away; not an error.
    Cancelled,
}
