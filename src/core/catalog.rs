use crate::core::classifier::classify;
use crate::core::response::{normalize_response, string_field};
use crate::domain::model::{Plan, DEFAULT_DURATION_DAYS, UNLIMITED_DATA_MB};
use crate::domain::ports::EsimTransport;
use crate::utils::error::{ErrorCategory, Result};
use serde_json::Value;
use std::sync::Arc;

const IDENTIFIER_KEYS: &[&str] = &["name", "bundleIdentifier", "bundle_identifier", "bundleName"];
const PLAN_ID_KEYS: &[&str] = &["id", "planId", "plan_id"];
const DATA_KEYS: &[&str] = &["dataAmount", "data_amount", "dataAmountMb"];
const DURATION_KEYS: &[&str] = &["duration", "durationDays", "duration_days"];
const PRICE_KEYS: &[&str] = &["price", "priceAmount", "retailPrice"];

/// Lists the bundles on sale for a country or region.
pub struct CatalogClient<T: EsimTransport> {
    transport: Arc<T>,
}

impl<T: EsimTransport> CatalogClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// An empty or unknown key yields an empty list, never an error.
    pub async fn list_plans(&self, region_or_country: &str) -> Result<Vec<Plan>> {
        let key = region_or_country.trim();
        if key.is_empty() {
            tracing::debug!("Empty catalogue key, skipping request");
            return Ok(Vec::new());
        }

        // 兩個字母視為 ISO 國家代碼，其餘當作區域名稱
        let (param, value) = if key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic()) {
            ("countries", key.to_ascii_uppercase())
        } else {
            ("region", key.to_string())
        };
        let query = [(param, value.as_str())];

        tracing::debug!("Fetching catalogue with {}={}", param, value);
        let response = self
            .transport
            .get(&["catalogue"], &query)
            .await
            .map_err(|raw| classify(&raw))?;

        let payload = match normalize_response(&response) {
            Ok(payload) => payload,
            // 上游拒絕這個 key 時視為未知區域
            Err(e) if matches!(e.category, ErrorCategory::NotFound | ErrorCategory::Validation) => {
                tracing::debug!("Catalogue key '{}' unknown upstream: {}", key, e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let records: &[Value] = match &payload {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => match obj.get("bundles") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        let plans: Vec<Plan> = records
            .iter()
            .filter_map(|record| {
                let plan = normalize_bundle(record);
                if plan.is_none() {
                    tracing::warn!("⚠️ Skipping catalogue record without identifier, data or price");
                }
                plan
            })
            .collect();

        tracing::info!("📦 {} plans available for '{}'", plans.len(), key);
        Ok(plans)
    }
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
}

/// 價格先四捨五入到兩位小數再轉成最小貨幣單位，避免浮點誤差
pub(crate) fn to_minor_units(price: f64) -> i64 {
    let rounded = (price * 100.0).round() / 100.0;
    (rounded * 100.0).round() as i64
}

/// Maps one upstream bundle record to a [`Plan`].
///
/// Returns `None` when the record cannot be bought: no identifier, no data
/// amount (and not unlimited), or no price. Identifiers are never guessed.
pub(crate) fn normalize_bundle(record: &Value) -> Option<Plan> {
    let bundle_identifier = string_field(record, IDENTIFIER_KEYS)?;
    let plan_id = string_field(record, PLAN_ID_KEYS).unwrap_or_else(|| bundle_identifier.clone());

    let unlimited_flag = record
        .get("unlimited")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let data_amount_mb = match number_field(record, DATA_KEYS) {
        _ if unlimited_flag => UNLIMITED_DATA_MB,
        Some(mb) if mb.round() as i64 == UNLIMITED_DATA_MB => UNLIMITED_DATA_MB,
        Some(mb) if mb >= 0.0 => mb.round() as i64,
        _ => return None,
    };

    let duration_days = number_field(record, DURATION_KEYS)
        .map(|d| d.round())
        .filter(|d| *d >= 1.0)
        .map(|d| d as u32)
        .unwrap_or(DEFAULT_DURATION_DAYS);

    let price_minor_units = to_minor_units(number_field(record, PRICE_KEYS)?);

    Some(Plan {
        plan_id,
        data_amount_mb,
        duration_days,
        price_minor_units,
        bundle_identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::RawError;
    use crate::core::test_support::ScriptedTransport;
    use serde_json::json;

    #[test]
    fn test_normalize_bundle_basic() {
        let record = json!({
            "name": "esim_1GB_7D_GB_V2",
            "dataAmount": 1000,
            "duration": 7,
            "price": 4.99
        });
        let plan = normalize_bundle(&record).unwrap();
        assert_eq!(plan.bundle_identifier, "esim_1GB_7D_GB_V2");
        assert_eq!(plan.plan_id, "esim_1GB_7D_GB_V2");
        assert_eq!(plan.data_amount_mb, 1000);
        assert_eq!(plan.duration_days, 7);
        assert_eq!(plan.price_minor_units, 499);
    }

    #[test]
    fn test_unlimited_collapses_to_sentinel() {
        let by_flag = json!({"name": "u1", "dataAmount": 50000, "unlimited": true, "price": 10});
        let by_value = json!({"name": "u2", "dataAmount": -1, "price": 10});
        assert_eq!(normalize_bundle(&by_flag).unwrap().data_amount_mb, UNLIMITED_DATA_MB);
        assert_eq!(normalize_bundle(&by_value).unwrap().data_amount_mb, UNLIMITED_DATA_MB);

        let flag_without_amount = json!({"name": "u3", "unlimited": true, "price": 10});
        assert!(normalize_bundle(&flag_without_amount).unwrap().is_unlimited());
    }

    #[test]
    fn test_missing_duration_defaults_to_30() {
        let record = json!({"name": "b", "dataAmount": 500, "price": "3.5"});
        let plan = normalize_bundle(&record).unwrap();
        assert_eq!(plan.duration_days, 30);
        assert_eq!(plan.price_minor_units, 350);

        let zero = json!({"name": "b", "dataAmount": 500, "duration": 0, "price": 1});
        assert_eq!(normalize_bundle(&zero).unwrap().duration_days, 30);
    }

    #[test]
    fn test_price_rounding() {
        assert_eq!(to_minor_units(19.999), 2000);
        assert_eq!(to_minor_units(0.1 + 0.2), 30);
        assert_eq!(to_minor_units(4.99), 499);
    }

    #[test]
    fn test_records_without_identifier_are_skipped() {
        let record = json!({"dataAmount": 1000, "duration": 7, "price": 4.99});
        assert!(normalize_bundle(&record).is_none());
    }

    #[tokio::test]
    async fn test_list_plans_by_country() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                200,
                json!({"bundles": [
                    {"name": "esim_1GB_7D_GB_V2", "dataAmount": 1000, "duration": 7, "price": 4.99},
                    {"description": "broken record"},
                    {"name": "esim_UL_30D_GB_V2", "unlimited": true, "price": 49.0}
                ]}),
            )
            .await;

        let client = CatalogClient::new(transport.clone());
        let plans = client.list_plans("gb").await.unwrap();

        assert_eq!(plans.len(), 2);
        assert!(plans[1].is_unlimited());
        assert_eq!(
            transport.requests.lock().await[0],
            "GET /catalogue?countries=GB"
        );
    }

    #[tokio::test]
    async fn test_list_plans_by_region_with_data_envelope() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                200,
                json!({"data": [{"name": "esim_3GB_30D_EU_V2", "dataAmount": 3000, "price": 12}]}),
            )
            .await;

        let client = CatalogClient::new(transport.clone());
        let plans = client.list_plans("Europe").await.unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duration_days, 30);
        assert_eq!(transport.requests.lock().await[0], "GET /catalogue?region=Europe");
    }

    #[tokio::test]
    async fn test_empty_key_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = CatalogClient::new(transport.clone());
        assert!(client.list_plans("  ").await.unwrap().is_empty());
        assert_eq!(transport.calls().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_key_is_empty_not_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(404, json!({"message": "Region not found"}))
            .await;
        let client = CatalogClient::new(transport);
        assert!(client.list_plans("Atlantis").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_key_is_empty_not_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(400, json!({"message": "Invalid region"}))
            .await;
        let client = CatalogClient::new(transport.clone());

        let plans = client.list_plans("Atlantis").await.unwrap();
        assert!(plans.is_empty());
        assert_eq!(transport.request(0).await, "GET /catalogue?region=Atlantis");
    }

    #[tokio::test]
    async fn test_server_error_is_still_reported() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(500, json!({"message": "Internal Server Error"}))
            .await;
        let client = CatalogClient::new(transport);
        let err = client.list_plans("GB").await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unknown);
    }

    #[tokio::test]
    async fn test_network_failure_is_transient() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(Err(RawError::network("connection refused")))
            .await;
        let client = CatalogClient::new(transport);
        let err = client.list_plans("GB").await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Transient);
    }
}
