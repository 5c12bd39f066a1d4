use crate::core::classifier::classify;
use crate::core::response::{normalize_response, string_field};
use crate::domain::model::{EsimIdentifier, OrderRequest, OrderResult};
use crate::domain::ports::EsimTransport;
use crate::utils::error::{ClassifiedError, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Places single-bundle purchase orders.
///
/// Not idempotent: two calls with the same bundle create two billable orders.
pub struct OrderSubmitter<T: EsimTransport> {
    transport: Arc<T>,
}

impl<T: EsimTransport> OrderSubmitter<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub async fn submit(&self, request: &OrderRequest) -> Result<OrderResult> {
        let bundle_identifier = request.bundle_identifier.trim();
        if bundle_identifier.is_empty() {
            return Err(ClassifiedError::validation(
                "cannot place an order without a bundle identifier",
            ));
        }

        if request.quantity == 0 {
            return Err(ClassifiedError::validation(format!(
                "order for '{}' needs a quantity of at least 1",
                bundle_identifier
            )));
        }

        let body = order_body(bundle_identifier, request.quantity, request.allow_reassign);
        tracing::debug!("Submitting order: {}", body);

        let response = self
            .transport
            .post_json(&["esims", "orders"], &body)
            .await
            .map_err(|raw| classify(&raw))?;
        let payload = normalize_response(&response)?;

        let order_reference = string_field(&payload, &["orderReference"]).ok_or_else(|| {
            // 訂單可能已在伺服器端部分成立，不可盲目重試
            ClassifiedError::unknown(format!(
                "order for '{}' was accepted without an order reference",
                bundle_identifier
            ))
            .with_status(response.status)
        })?;

        let esim_identifiers = extract_esims(&payload);
        tracing::info!(
            "🧾 Order {} placed for '{}' ({} eSIM identifiers)",
            order_reference,
            bundle_identifier,
            esim_identifiers.len()
        );

        Ok(OrderResult {
            order_reference,
            esim_identifiers,
        })
    }
}

fn order_body(bundle_identifier: &str, quantity: u32, allow_reassign: bool) -> Value {
    json!({
        "type": "transaction",
        "assign": true,
        "order": [{
            "type": "bundle",
            "item": bundle_identifier,
            "quantity": quantity,
            "allowReassign": allow_reassign,
        }]
    })
}

fn extract_esims(payload: &Value) -> Vec<EsimIdentifier> {
    let Some(lines) = payload.get("order").and_then(Value::as_array) else {
        return Vec::new();
    };

    lines
        .iter()
        .filter_map(|line| line.get("esims").and_then(Value::as_array))
        .flatten()
        .map(|esim| EsimIdentifier {
            matching_id: string_field(esim, &["matchingId", "matching_id"]),
            iccid: string_field(esim, &["iccid"]),
        })
        .filter(|id| id.matching_id.is_some() || id.iccid.is_some())
        .collect()
}
