use crate::core::catalog::normalize_bundle;
use crate::core::classifier::classify;
use crate::core::response::normalize_response;
use crate::domain::model::Plan;
use crate::domain::ports::EsimTransport;
use crate::utils::error::{ClassifiedError, Result};
use std::sync::Arc;

/// Confirms a bundle exists before a billable order is created for it.
pub struct BundleVerifier<T: EsimTransport> {
    transport: Arc<T>,
}

impl<T: EsimTransport> BundleVerifier<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub async fn verify(&self, bundle_identifier: &str) -> Result<Plan> {
        let bundle_identifier = bundle_identifier.trim();
        if bundle_identifier.is_empty() {
            return Err(ClassifiedError::validation(
                "a bundle identifier is required to start checkout",
            ));
        }

        tracing::debug!("Verifying bundle '{}'", bundle_identifier);
        let response = self
            .transport
            .get(&["bundles", bundle_identifier], &[])
            .await
            .map_err(|raw| classify(&raw))?;

        // 任何非 2xx 都視為找不到，保留上游狀態碼方便排查
        if !response.is_success() {
            tracing::warn!(
                "Bundle '{}' rejected by upstream with status {}",
                bundle_identifier,
                response.status
            );
            return Err(ClassifiedError::not_found(format!(
                "bundle '{}' not found (upstream status {})",
                bundle_identifier, response.status
            ))
            .with_status(response.status));
        }

        // 2xx 但內容無法使用的紀錄一樣視為不可購買
        let unusable = |reason: String| {
            tracing::warn!("Bundle '{}' lookup unusable: {}", bundle_identifier, reason);
            ClassifiedError::not_found(format!(
                "bundle '{}' cannot be purchased: {}",
                bundle_identifier, reason
            ))
            .with_status(response.status)
        };

        let payload = normalize_response(&response).map_err(|e| unusable(e.message))?;
        let mut plan = normalize_bundle(&payload)
            .or_else(|| {
                // Lookup by identifier sometimes omits the name field; the key we asked for is authoritative.
                let mut record = payload.clone();
                if let Some(obj) = record.as_object_mut() {
                    obj.insert("name".to_string(), bundle_identifier.into());
                }
                normalize_bundle(&record)
            })
            .ok_or_else(|| unusable("record has no data amount or price".to_string()))?;

        if plan.bundle_identifier != bundle_identifier {
            tracing::debug!(
                "Upstream reports '{}' for requested '{}'",
                plan.bundle_identifier,
                bundle_identifier
            );
            plan.bundle_identifier = bundle_identifier.to_string();
        }

        tracing::info!(
            "✅ Bundle '{}' verified: {} for {} days",
            bundle_identifier,
            plan.data_display(),
            plan.duration_days
        );
        Ok(plan)
    }
}
